use super::Extension;
use crate::application::errors::HostError;
use crate::domain::entities::ExtensionDescriptor;

/// Where an extension comes from.
///
/// `describe` reads metadata only and never runs extension code;
/// `instantiate` builds a fresh instance and may be called again on reload.
pub trait ExtensionSource: Send + Sync {
    /// Human-readable location (path, module name)
    fn location(&self) -> String;

    fn describe(&self) -> Result<ExtensionDescriptor, HostError>;

    fn instantiate(&self) -> Result<Box<dyn Extension>, HostError>;

    /// Content hash used to detect on-disk changes
    fn fingerprint(&self) -> Option<String> {
        None
    }
}
