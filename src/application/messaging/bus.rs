//! Event bus - Routes published events through middleware to subscribed handlers

use super::middleware::{EventContext, EventMiddleware, MiddlewareError, Next};
use crate::application::errors::{guarded, ExtensionFault};
use crate::domain::entities::{
    DispatchResult, EventCategory, EventFilter, EventHandler, HandlerPriority, HandlerReply,
    HookSpec, Propagation, SubscriptionHandle,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
struct Subscription {
    handle: SubscriptionHandle,
    owner: String,
    handler: EventHandler,
    priority: HandlerPriority,
    once: bool,
    filter: Option<EventFilter>,
}

impl Subscription {
    fn sort_key(&self) -> (HandlerPriority, SubscriptionHandle) {
        (self.priority, self.handle)
    }
}

/// Dispatch counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub handled: u64,
    pub faults: u64,
    pub vetoed: u64,
}

/// Priority-ordered publish/subscribe bus.
///
/// Every method takes `&self`; handlers run with no internal lock held, so a
/// handler may subscribe, unsubscribe or publish again.
pub struct EventBus {
    subscriptions: RwLock<BTreeMap<EventCategory, Vec<Subscription>>>,
    middleware: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    sequence: AtomicU64,
    stats: RwLock<BusStats>,
    /// Once-handlers currently running; nested publishes skip them
    running_once: Mutex<BTreeSet<SubscriptionHandle>>,
    cache: RwLock<BTreeMap<String, Value>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            middleware: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(1),
            stats: RwLock::new(BusStats::default()),
            running_once: Mutex::new(BTreeSet::new()),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EventCategory, Vec<Subscription>>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EventCategory, Vec<Subscription>>> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, update: impl FnOnce(&mut BusStats)) {
        update(&mut self.stats.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Append middleware to the chain
    pub fn add_middleware<M: EventMiddleware + 'static>(&self, middleware: M) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    /// Register a handler for a category
    pub fn subscribe(
        &self,
        category: EventCategory,
        handler: EventHandler,
        priority: HandlerPriority,
        owner: impl Into<String>,
        once: bool,
        filter: Option<EventFilter>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.sequence.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription {
            handle,
            owner: owner.into(),
            handler,
            priority,
            once,
            filter,
        };

        tracing::debug!(
            "Subscribed {} to {} (priority {}, handle {})",
            subscription.owner,
            category,
            priority,
            handle.0
        );

        let mut subscriptions = self.write();
        let list = subscriptions.entry(category).or_default();
        let position = list.partition_point(|s| s.sort_key() < subscription.sort_key());
        list.insert(position, subscription);
        handle
    }

    /// Register a hook contributed by an extension
    pub fn subscribe_hook(&self, hook: HookSpec, owner: &str) -> SubscriptionHandle {
        self.subscribe(
            hook.category,
            hook.handler,
            hook.priority,
            owner,
            hook.once,
            hook.filter,
        )
    }

    /// Convenience for host-side closures
    pub fn on<F>(&self, category: EventCategory, owner: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> Result<HandlerReply, ExtensionFault> + Send + Sync + 'static,
    {
        self.subscribe_hook(HookSpec::new(category, handler), owner)
    }

    /// Remove one subscription; returns false if it was already gone
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscriptions = self.write();
        let mut removed = false;
        for list in subscriptions.values_mut() {
            let before = list.len();
            list.retain(|s| s.handle != handle);
            if list.len() != before {
                removed = true;
                break;
            }
        }
        subscriptions.retain(|_, list| !list.is_empty());
        removed
    }

    /// Remove every subscription owned by `owner`
    pub fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subscriptions = self.write();
        let mut count = 0;
        for list in subscriptions.values_mut() {
            let before = list.len();
            list.retain(|s| s.owner != owner);
            count += before - list.len();
        }
        subscriptions.retain(|_, list| !list.is_empty());
        if count > 0 {
            tracing::debug!("Removed {} subscriptions owned by {}", count, owner);
        }
        count
    }

    /// Mark a once-handler as running; false if it already is
    fn claim_once(&self, handle: SubscriptionHandle) -> bool {
        self.running_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle)
    }

    fn release_once(&self, handle: SubscriptionHandle) {
        self.running_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
    }

    /// Keep a value under `key` for later lookups by handlers
    pub fn cache(&self, key: impl Into<String>, value: Value) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn cached(&self, key: &str) -> Option<Value> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_subscribed(&self, category: &EventCategory, handle: SubscriptionHandle) -> bool {
        self.read()
            .get(category)
            .is_some_and(|list| list.iter().any(|s| s.handle == handle))
    }

    /// Publish an event and collect one result per invoked handler
    pub fn publish(&self, category: EventCategory, payload: Value) -> Vec<DispatchResult> {
        self.record(|s| s.published += 1);

        let chain = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let ctx = match Next::new(chain).run(EventContext::new(category, payload)) {
            Ok(ctx) => ctx,
            Err(MiddlewareError::Vetoed(reason)) => {
                tracing::debug!("Publish vetoed by middleware: {}", reason);
                self.record(|s| s.vetoed += 1);
                return Vec::new();
            }
            Err(MiddlewareError::Internal(msg)) => {
                tracing::error!("Event middleware failed: {}", msg);
                self.record(|s| s.vetoed += 1);
                return Vec::new();
            }
        };

        let snapshot: Vec<Subscription> = self.read().get(&ctx.category).cloned().unwrap_or_default();
        let mut results = Vec::with_capacity(snapshot.len());

        for subscription in snapshot {
            // Removed by an earlier handler of this same publish
            if !self.is_subscribed(&ctx.category, subscription.handle) {
                continue;
            }

            if let Some(filter) = &subscription.filter {
                let accepted = guarded(|| Ok(filter(&ctx.payload))).unwrap_or_else(|fault| {
                    tracing::warn!("Event filter of {} {}", subscription.owner, fault);
                    false
                });
                if !accepted {
                    continue;
                }
            }

            if subscription.once && !self.claim_once(subscription.handle) {
                continue;
            }
            let handler = subscription.handler.clone();
            let outcome = guarded(|| handler(&ctx.payload));
            if subscription.once {
                if outcome.is_ok() {
                    self.unsubscribe(subscription.handle);
                }
                self.release_once(subscription.handle);
            }
            match outcome {
                Ok(reply) => {
                    self.record(|s| s.handled += 1);
                    results.push(DispatchResult {
                        handle: subscription.handle,
                        owner: subscription.owner,
                        outcome: Ok(reply.value),
                    });
                    if reply.propagation == Propagation::Stop {
                        tracing::debug!("Propagation of {} stopped", ctx.category);
                        break;
                    }
                }
                Err(fault) => {
                    tracing::error!(
                        "Handler {} of {} failed on {}: {}",
                        subscription.handle.0,
                        subscription.owner,
                        ctx.category,
                        fault
                    );
                    self.record(|s| s.faults += 1);
                    results.push(DispatchResult {
                        handle: subscription.handle,
                        owner: subscription.owner,
                        outcome: Err(fault),
                    });
                }
            }
        }

        results
    }

    /// Number of handlers subscribed to a category
    pub fn handler_count(&self, category: &EventCategory) -> usize {
        self.read().get(category).map(Vec::len).unwrap_or(0)
    }

    /// Number of handlers across all categories
    pub fn total_handlers(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    /// Number of handlers owned by `owner`
    pub fn owned_by(&self, owner: &str) -> usize {
        self.read()
            .values()
            .flat_map(|list| list.iter())
            .filter(|s| s.owner == owner)
            .count()
    }

    /// Categories with at least one handler
    pub fn categories(&self) -> Vec<EventCategory> {
        self.read().keys().cloned().collect()
    }

    pub fn stats(&self) -> BusStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::middleware::TransformMiddleware;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> EventHandler {
        let log = log.clone();
        let label = label.to_string();
        Arc::new(move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(HandlerReply::value(label.clone()))
        })
    }

    #[test]
    fn test_dispatch_order_priority_then_sequence() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventCategory::CombatEnd, recorder(&log, "late"), 90, "a", false, None);
        bus.subscribe(EventCategory::CombatEnd, recorder(&log, "first"), 10, "a", false, None);
        bus.subscribe(EventCategory::CombatEnd, recorder(&log, "second"), 10, "b", false, None);

        let results = bus.publish(EventCategory::CombatEnd, json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "late"]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, Ok(json!("first")));
    }

    #[test]
    fn test_stop_propagation_only_affects_current_publish() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventCategory::ItemUse, "a", |_| Ok(HandlerReply::stop("halt")));
        bus.subscribe(EventCategory::ItemUse, recorder(&log, "after"), 60, "b", false, None);

        assert_eq!(bus.publish(EventCategory::ItemUse, json!({})).len(), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.handler_count(&EventCategory::ItemUse), 2);
    }

    #[test]
    fn test_faulting_handler_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventCategory::GameSave, "bad", |_| panic!("disk on fire"));
        bus.subscribe(EventCategory::GameSave, recorder(&log, "good"), 70, "good", false, None);

        let results = bus.publish(EventCategory::GameSave, json!(null));
        assert_eq!(results.len(), 2);
        assert!(results[0].is_fault());
        assert_eq!(results[1].outcome, Ok(json!("good")));
        assert_eq!(bus.stats().faults, 1);
    }

    #[test]
    fn test_once_handler_runs_a_single_time() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventCategory::GameStart, recorder(&log, "once"), 50, "a", true, None);

        bus.publish(EventCategory::GameStart, json!({}));
        bus.publish(EventCategory::GameStart, json!({}));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(bus.handler_count(&EventCategory::GameStart), 0);
    }

    #[test]
    fn test_once_handler_that_faults_stays_subscribed() {
        let bus = EventBus::new();
        bus.subscribe_hook(
            HookSpec::new(EventCategory::GameStart, |_| Err("not yet".into())).once(),
            "a",
        );
        bus.publish(EventCategory::GameStart, json!({}));
        assert_eq!(bus.handler_count(&EventCategory::GameStart), 1);
    }

    #[test]
    fn test_once_handler_is_not_reentered_by_nested_publish() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0));
        let inner_bus = Arc::downgrade(&bus);
        let counter = calls.clone();
        bus.subscribe_hook(
            HookSpec::new(EventCategory::TimeChange, move |_| {
                *counter.lock().unwrap() += 1;
                if let Some(bus) = inner_bus.upgrade() {
                    bus.publish(EventCategory::TimeChange, json!({"nested": true}));
                }
                Ok(HandlerReply::none())
            })
            .once(),
            "clock",
        );

        bus.publish(EventCategory::TimeChange, json!({}));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(bus.handler_count(&EventCategory::TimeChange), 0);
    }

    #[test]
    fn test_event_cache() {
        let bus = EventBus::new();
        assert_eq!(bus.cached("last_boss"), None);
        bus.cache("last_boss", json!({"name": "Lich"}));
        bus.cache("last_boss", json!({"name": "Dragon"}));
        assert_eq!(bus.cached("last_boss"), Some(json!({"name": "Dragon"})));
        bus.clear_cache();
        assert_eq!(bus.cached("last_boss"), None);
    }

    #[test]
    fn test_filter_skips_handler() {
        let bus = EventBus::new();
        bus.subscribe_hook(
            HookSpec::new(EventCategory::EnemyKilled, |p| Ok(HandlerReply::value(p["xp"].clone())))
                .with_filter(|p| p["boss"] == json!(true)),
            "a",
        );
        assert!(bus.publish(EventCategory::EnemyKilled, json!({"boss": false})).is_empty());
        let results = bus.publish(EventCategory::EnemyKilled, json!({"boss": true, "xp": 500}));
        assert_eq!(results[0].outcome, Ok(json!(500)));
    }

    #[test]
    fn test_middleware_can_veto_and_rewrite() {
        let bus = EventBus::new();
        bus.on(EventCategory::ShopBuy, "shop", |p| Ok(HandlerReply::value(p["price"].clone())));
        bus.add_middleware(TransformMiddleware::new(|_, p: &mut Value| {
            if p["banned"] == json!(true) {
                return Err("banned".into());
            }
            p["price"] = json!(p["price"].as_i64().unwrap_or(0) / 2);
            Ok(())
        }));

        assert!(bus.publish(EventCategory::ShopBuy, json!({"banned": true})).is_empty());
        let results = bus.publish(EventCategory::ShopBuy, json!({"price": 100}));
        assert_eq!(results[0].outcome, Ok(json!(50)));
        assert_eq!(bus.stats().vetoed, 1);
    }

    #[test]
    fn test_unsubscribe_all_by_owner() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventCategory::ItemDrop, recorder(&log, "x"), 50, "x", false, None);
        bus.subscribe(EventCategory::ItemPickup, recorder(&log, "x"), 50, "x", false, None);
        let keep = bus.subscribe(EventCategory::ItemDrop, recorder(&log, "y"), 50, "y", false, None);

        assert_eq!(bus.unsubscribe_all("x"), 2);
        assert_eq!(bus.owned_by("x"), 0);
        assert_eq!(bus.categories(), vec![EventCategory::ItemDrop]);
        assert!(bus.unsubscribe(keep));
        assert!(!bus.unsubscribe(keep));
        assert_eq!(bus.total_handlers(), 0);
    }

    #[test]
    fn test_handler_removed_mid_publish_is_skipped() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&bus);
        bus.on(EventCategory::Custom("tick".into()), "a", move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.unsubscribe_all("b");
            }
            Ok(HandlerReply::none())
        });
        bus.subscribe(EventCategory::Custom("tick".into()), recorder(&log, "b"), 60, "b", false, None);

        let results = bus.publish(EventCategory::Custom("tick".into()), json!({}));
        assert_eq!(results.len(), 1);
        assert!(log.lock().unwrap().is_empty());
    }
}
