//! Builder-style extensions
//!
//! For extensions defined inline by the embedding application:
//!
//! ```ignore
//! let source = ExtensionBuilder::new("greeter")
//!     .with_priority(10)
//!     .command(CommandRegistration::new("hello", |_, _| Ok("Hello!".into())))
//!     .hook(HookSpec::new(EventCategory::GameStart, |_| Ok(HandlerReply::value("greeted"))))
//!     .build();
//! host.add_source(source)?;
//! ```

use crate::application::errors::ExtensionFault;
use crate::application::services::ExtensionHost;
use crate::domain::entities::{
    CommandRegistration, ContentBundle, ExtensionDescriptor, HookSpec, SourceKind,
};
use crate::domain::traits::{Capabilities, Capability, Extension, HookResult};
use crate::infrastructure::plugins::ModuleSource;
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle callback
pub type LifecycleFn = Arc<dyn Fn(&ExtensionHost) -> HookResult + Send + Sync>;

/// Configuration callback
pub type ConfigFn = Arc<dyn Fn(&Value) -> HookResult + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    on_load: Option<LifecycleFn>,
    on_unload: Option<LifecycleFn>,
    on_enable: Option<LifecycleFn>,
    on_disable: Option<LifecycleFn>,
    on_config: Option<ConfigFn>,
}

/// Assembles an in-process extension from closures and registrations
pub struct ExtensionBuilder {
    descriptor: ExtensionDescriptor,
    callbacks: Callbacks,
    hooks: Vec<HookSpec>,
    commands: Vec<CommandRegistration>,
    content: ContentBundle,
}

impl ExtensionBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            descriptor: ExtensionDescriptor::new(id, SourceKind::Module),
            callbacks: Callbacks::default(),
            hooks: Vec::new(),
            commands: Vec::new(),
            content: ContentBundle::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_name(name);
        self
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.descriptor = self.descriptor.with_version(version);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.descriptor.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.descriptor = self.descriptor.with_priority(priority);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_tag(tag);
        self
    }

    pub fn requires(mut self, id: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.requires(id);
        self
    }

    pub fn soft_requires(mut self, id: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.soft_requires(id);
        self
    }

    pub fn conflicts_with(mut self, id: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.conflicts_with(id);
        self
    }

    pub fn hot_reloadable(mut self) -> Self {
        self.descriptor.supports_hot_reload = true;
        self
    }

    /// Declare a config schema and defaults
    pub fn with_config(mut self, schema: Value, defaults: Value) -> Self {
        self.descriptor.config_schema = Some(schema);
        self.descriptor.default_config = Some(defaults);
        self
    }

    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExtensionHost) -> HookResult + Send + Sync + 'static,
    {
        self.callbacks.on_load = Some(Arc::new(f));
        self
    }

    pub fn on_unload<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExtensionHost) -> HookResult + Send + Sync + 'static,
    {
        self.callbacks.on_unload = Some(Arc::new(f));
        self
    }

    pub fn on_enable<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExtensionHost) -> HookResult + Send + Sync + 'static,
    {
        self.callbacks.on_enable = Some(Arc::new(f));
        self
    }

    pub fn on_disable<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExtensionHost) -> HookResult + Send + Sync + 'static,
    {
        self.callbacks.on_disable = Some(Arc::new(f));
        self
    }

    pub fn on_config<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> HookResult + Send + Sync + 'static,
    {
        self.callbacks.on_config = Some(Arc::new(f));
        self
    }

    pub fn hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn command(mut self, command: CommandRegistration) -> Self {
        self.commands.push(command);
        self
    }

    pub fn content(mut self, content_type: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        self.content
            .entry(content_type.into())
            .or_default()
            .insert(id.into(), payload);
        self
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    /// Finish into a module source; every instantiation shares the closures
    pub fn build(self) -> Arc<ModuleSource> {
        let template = BuiltExtension {
            callbacks: self.callbacks,
            hooks: self.hooks,
            commands: self.commands,
            content: self.content,
        };
        let location = format!("builder://{}", self.descriptor.id);
        Arc::new(
            ModuleSource::new(self.descriptor, move || Box::new(template.clone()))
                .with_location(location),
        )
    }
}

#[derive(Clone)]
struct BuiltExtension {
    callbacks: Callbacks,
    hooks: Vec<HookSpec>,
    commands: Vec<CommandRegistration>,
    content: ContentBundle,
}

fn run(callback: &Option<LifecycleFn>, host: &ExtensionHost) -> HookResult {
    match callback {
        Some(callback) => callback(host),
        None => Ok(()),
    }
}

impl Extension for BuiltExtension {
    fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::none();
        if !self.hooks.is_empty() {
            capabilities = capabilities.with(Capability::Hooks);
        }
        if !self.commands.is_empty() {
            capabilities = capabilities.with(Capability::Commands);
        }
        if !self.content.is_empty() {
            capabilities = capabilities.with(Capability::Content);
        }
        if self.callbacks.on_config.is_some() {
            capabilities = capabilities.with(Capability::Configurable);
        }
        capabilities
    }

    fn on_load(&mut self, host: &ExtensionHost) -> HookResult {
        run(&self.callbacks.on_load, host)
    }

    fn on_unload(&mut self, host: &ExtensionHost) -> HookResult {
        run(&self.callbacks.on_unload, host)
    }

    fn on_enable(&mut self, host: &ExtensionHost) -> HookResult {
        run(&self.callbacks.on_enable, host)
    }

    fn on_disable(&mut self, host: &ExtensionHost) -> HookResult {
        run(&self.callbacks.on_disable, host)
    }

    fn register_hooks(&mut self) -> Result<Vec<HookSpec>, ExtensionFault> {
        Ok(self.hooks.clone())
    }

    fn register_commands(&mut self) -> Result<Vec<CommandRegistration>, ExtensionFault> {
        Ok(self.commands.clone())
    }

    fn register_content(&mut self) -> Result<ContentBundle, ExtensionFault> {
        Ok(self.content.clone())
    }

    fn set_config(&mut self, config: &Value) -> HookResult {
        match &self.callbacks.on_config {
            Some(on_config) => on_config(config),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CommandContext, EventCategory, ExtensionState, HandlerReply};
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_built_extension_registers_everything() {
        let host = ExtensionHost::new();
        let source = ExtensionBuilder::new("greeter")
            .with_priority(10)
            .hook(HookSpec::new(EventCategory::GameStart, |_| {
                Ok(HandlerReply::value("greeted"))
            }))
            .command(CommandRegistration::new("hello", |_, _| Ok("Hello!".into())).with_alias("hi"))
            .content("npcs", "greeter_bob", json!({"name": "Bob"}))
            .build();
        host.add_source(source).unwrap();
        host.load("greeter").unwrap();

        let outcome = host.execute_line("/hi", &CommandContext::new());
        assert!(outcome.success);
        assert_eq!(outcome.message, "Hello!");
        assert_eq!(host.publish(EventCategory::GameStart, json!({})).len(), 1);
        assert!(host.content().get("npcs", "greeter_bob").is_some());
    }

    #[test]
    fn test_failing_enable_leaves_nothing_behind() {
        let host = ExtensionHost::new();
        let source = ExtensionBuilder::new("flaky")
            .command(CommandRegistration::new("flaky", |_, _| Ok(String::new())))
            .on_enable(|_| Err(ExtensionFault::new("not today")))
            .build();
        host.add_source(source).unwrap();

        let err = host.load("flaky").unwrap_err();
        assert_eq!(err.kind(), "HookFailure");
        assert!(matches!(host.state("flaky"), Some(ExtensionState::Error(_))));
        assert!(!host.commands().contains("flaky"));
    }

    #[test]
    fn test_config_reaches_extension() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let host = ExtensionHost::new();
        let source = ExtensionBuilder::new("tuned")
            .with_config(json!({"level": "integer"}), json!({"level": 1}))
            .on_config(move |config| {
                sink.lock().unwrap().push(config.clone());
                Ok(())
            })
            .build();
        host.add_source(source).unwrap();
        host.load("tuned").unwrap();
        host.set_config("tuned", json!({"level": 5})).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"level": 1}), json!({"level": 5})]
        );
    }
}
