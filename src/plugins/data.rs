//! Data extensions - contribute content records and nothing else

use crate::application::errors::ExtensionFault;
use crate::application::services::ExtensionHost;
use crate::domain::entities::ContentBundle;
use crate::domain::traits::{Capabilities, Capability, Extension, HookResult};

/// Extension backed by a declarative document's content sections
pub struct DataExtension {
    id: String,
    content: ContentBundle,
}

impl DataExtension {
    pub fn new(id: impl Into<String>, content: ContentBundle) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }

    /// Number of records across all sections
    pub fn record_count(&self) -> usize {
        self.content.values().map(|records| records.len()).sum()
    }
}

impl Extension for DataExtension {
    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with(Capability::Content)
    }

    fn on_load(&mut self, _host: &ExtensionHost) -> HookResult {
        tracing::debug!(
            "Data extension {} carries {} records in {} sections",
            self.id,
            self.record_count(),
            self.content.len()
        );
        Ok(())
    }

    fn on_unload(&mut self, _host: &ExtensionHost) -> HookResult {
        Ok(())
    }

    fn on_enable(&mut self, _host: &ExtensionHost) -> HookResult {
        Ok(())
    }

    fn on_disable(&mut self, _host: &ExtensionHost) -> HookResult {
        Ok(())
    }

    fn register_content(&mut self) -> Result<ContentBundle, ExtensionFault> {
        Ok(self.content.clone())
    }
}
