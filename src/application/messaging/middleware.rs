//! Middleware system for the event publishing pipeline

use crate::application::errors::{guarded, ExtensionFault};
use crate::domain::entities::EventCategory;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Context passed through the middleware chain
#[derive(Debug, Clone)]
pub struct EventContext {
    pub category: EventCategory,
    pub payload: Value,
}

impl EventContext {
    pub fn new(category: EventCategory, payload: Value) -> Self {
        Self { category, payload }
    }

    /// Set a field on an object payload; non-object payloads are left alone
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.into(), value.into());
        }
    }
}

/// Middleware trait - runs before any handler sees a payload
pub trait EventMiddleware: Send + Sync {
    /// Inspect or rewrite the context, then hand it to `next` or veto
    fn process(&self, ctx: EventContext, next: Next) -> MiddlewareResult;
}

/// Result of middleware processing
pub type MiddlewareResult = Result<EventContext, MiddlewareError>;

/// Middleware errors
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareError {
    /// Stop the publish; no handler runs
    Vetoed(String),
    /// Internal error
    Internal(String),
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareError::Vetoed(msg) => write!(f, "Vetoed: {}", msg),
            MiddlewareError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// Next middleware in chain
#[derive(Clone)]
pub struct Next {
    chain: Arc<Vec<Arc<dyn EventMiddleware>>>,
    index: usize,
    /// Set once this link has been run
    entered: Arc<AtomicBool>,
}

impl Next {
    pub fn new(middlewares: Vec<Arc<dyn EventMiddleware>>) -> Self {
        Self {
            chain: Arc::new(middlewares),
            index: 0,
            entered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process remaining middleware
    pub fn run(self, ctx: EventContext) -> MiddlewareResult {
        self.entered.store(true, Ordering::SeqCst);
        let Some(current) = self.chain.get(self.index).cloned() else {
            // No more middleware, processing complete
            return Ok(ctx);
        };
        let next = Next {
            chain: self.chain.clone(),
            index: self.index + 1,
            entered: Arc::new(AtomicBool::new(false)),
        };

        let fallback = ctx.clone();
        let skip = next.clone();
        let outcome = guarded(|| Ok::<_, ExtensionFault>(current.process(ctx, next)));
        match outcome {
            Ok(result) => result,
            Err(fault) if skip.entered.load(Ordering::SeqCst) => {
                // The rest of the chain already ran; its result is lost with the panic
                tracing::error!("Event middleware {} for {} after passing it on", fault, fallback.category);
                Err(MiddlewareError::Internal(fault.to_string()))
            }
            Err(fault) => {
                // A middleware that panics before passing on is skipped
                tracing::error!("Event middleware {} for {}", fault, fallback.category);
                skip.run(fallback)
            }
        }
    }
}

/// Middleware chain builder
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn EventMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: EventMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Vec<Arc<dyn EventMiddleware>> {
        self.middlewares
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Closure-backed middleware: rewrite the payload, or return `Err` to veto
pub struct TransformMiddleware<F> {
    transform: F,
}

impl<F> TransformMiddleware<F>
where
    F: Fn(&EventCategory, &mut Value) -> Result<(), String> + Send + Sync,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

impl<F> EventMiddleware for TransformMiddleware<F>
where
    F: Fn(&EventCategory, &mut Value) -> Result<(), String> + Send + Sync,
{
    fn process(&self, mut ctx: EventContext, next: Next) -> MiddlewareResult {
        (self.transform)(&ctx.category, &mut ctx.payload).map_err(MiddlewareError::Vetoed)?;
        next.run(ctx)
    }
}

/// Logging middleware for debugging
pub struct LoggingMiddleware;

impl EventMiddleware for LoggingMiddleware {
    fn process(&self, ctx: EventContext, next: Next) -> MiddlewareResult {
        let preview: String = ctx.payload.to_string().chars().take(80).collect();
        let category = ctx.category.clone();

        tracing::debug!("[{}] {}", category, preview);

        let result = next.run(ctx);

        if let Err(e) = &result {
            tracing::debug!("[{}] {}", category, e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(chain: Vec<Arc<dyn EventMiddleware>>, payload: Value) -> MiddlewareResult {
        Next::new(chain).run(EventContext::new(EventCategory::CombatEnd, payload))
    }

    #[test]
    fn test_chain_applies_in_order() {
        let chain = MiddlewareChain::new()
            .add(TransformMiddleware::new(|_, p: &mut Value| {
                p["trail"] = json!("a");
                Ok(())
            }))
            .add(TransformMiddleware::new(|_, p: &mut Value| {
                let trail = format!("{}b", p["trail"].as_str().unwrap_or_default());
                p["trail"] = json!(trail);
                Ok(())
            }))
            .build();

        let ctx = run(chain, json!({})).unwrap();
        assert_eq!(ctx.payload["trail"], "ab");
    }

    #[test]
    fn test_veto_stops_chain() {
        let chain = MiddlewareChain::new()
            .add(TransformMiddleware::new(|_, _: &mut Value| Err("muted".to_string())))
            .add(TransformMiddleware::new(|_, _: &mut Value| panic!("never reached")))
            .build();

        assert_eq!(
            run(chain, json!({})).unwrap_err(),
            MiddlewareError::Vetoed("muted".into())
        );
    }

    #[test]
    fn test_panicking_middleware_is_skipped() {
        let chain = MiddlewareChain::new()
            .add(TransformMiddleware::new(|_, _: &mut Value| panic!("broken")))
            .add(TransformMiddleware::new(|_, p: &mut Value| {
                p["seen"] = json!(true);
                Ok(())
            }))
            .build();

        let ctx = run(chain, json!({"x": 1})).unwrap();
        assert_eq!(ctx.payload, json!({"x": 1, "seen": true}));
    }

    struct PanicsAfterPassing;

    impl EventMiddleware for PanicsAfterPassing {
        fn process(&self, ctx: EventContext, next: Next) -> MiddlewareResult {
            let _ = next.run(ctx);
            panic!("too late");
        }
    }

    #[test]
    fn test_panic_after_passing_on_does_not_rerun_chain() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = runs.clone();
        let chain = MiddlewareChain::new()
            .add(PanicsAfterPassing)
            .add(TransformMiddleware::new(move |_, p: &mut Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                p["counted"] = json!(true);
                Ok(())
            }))
            .build();

        let result = run(chain, json!({}));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(MiddlewareError::Internal(_))));
    }

    #[test]
    fn test_logging_middleware_passes_through() {
        let chain = MiddlewareChain::new()
            .add(LoggingMiddleware)
            .add(TransformMiddleware::new(|_, p: &mut Value| {
                p["logged"] = json!(true);
                Ok(())
            }))
            .build();

        let ctx = run(chain, json!({"x": 1})).unwrap();
        assert_eq!(ctx.payload, json!({"x": 1, "logged": true}));
    }

    #[test]
    fn test_context_set_only_touches_objects() {
        let mut ctx = EventContext::new(EventCategory::GameStart, json!({}));
        ctx.set("k", 1);
        assert_eq!(ctx.payload, json!({"k": 1}));

        let mut ctx = EventContext::new(EventCategory::GameStart, json!(3));
        ctx.set("k", 1);
        assert_eq!(ctx.payload, json!(3));
    }
}
