//! Domain traits - The interfaces extensions and their sources implement

pub mod extension;
pub mod source;

pub use extension::{Capabilities, Capability, Extension, HookResult};
pub use source::ExtensionSource;
