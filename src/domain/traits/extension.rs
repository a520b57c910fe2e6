use crate::application::errors::ExtensionFault;
use crate::application::services::ExtensionHost;
use crate::domain::entities::{CommandRegistration, ContentBundle, HookSpec, ReloadSnapshot};
use std::collections::BTreeSet;

/// Result of a lifecycle hook
pub type HookResult = Result<(), ExtensionFault>;

/// Optional functionality an extension can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `register_hooks` returns event subscriptions
    Hooks,
    /// `register_commands` returns commands
    Commands,
    /// `register_content` returns content records
    Content,
    /// `before_reload` / `after_reload` carry state across a reload
    Snapshot,
    /// `set_config` accepts configuration values
    Configurable,
}

/// Set of capabilities reported by an extension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Interface every extension exposes to the host.
///
/// The four lifecycle hooks are mandatory. Everything else is optional and only
/// called when [`Extension::capabilities`] reports the matching [`Capability`].
pub trait Extension: Send {
    /// Optional functionality this instance implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Called when the extension is loaded, before anything is registered
    fn on_load(&mut self, host: &ExtensionHost) -> HookResult;

    /// Called when the extension is unloaded, after `on_disable`
    fn on_unload(&mut self, host: &ExtensionHost) -> HookResult;

    /// Called when the extension becomes active
    fn on_enable(&mut self, host: &ExtensionHost) -> HookResult;

    /// Called when the extension stops being active
    fn on_disable(&mut self, host: &ExtensionHost) -> HookResult;

    fn register_hooks(&mut self) -> Result<Vec<HookSpec>, ExtensionFault> {
        Ok(Vec::new())
    }

    fn register_commands(&mut self) -> Result<Vec<CommandRegistration>, ExtensionFault> {
        Ok(Vec::new())
    }

    fn register_content(&mut self) -> Result<ContentBundle, ExtensionFault> {
        Ok(ContentBundle::new())
    }

    /// Capture state before the instance is torn down for a reload
    fn before_reload(&mut self) -> Result<ReloadSnapshot, ExtensionFault> {
        Err(ExtensionFault::new("snapshots are not supported"))
    }

    /// Restore state captured by the previous instance's `before_reload`
    fn after_reload(&mut self, _snapshot: ReloadSnapshot) -> HookResult {
        Ok(())
    }

    /// Receive the effective configuration
    fn set_config(&mut self, _config: &serde_json::Value) -> HookResult {
        Ok(())
    }
}
