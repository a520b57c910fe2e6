//! Dynamic extension host
//!
//! Discovers extensions from code modules, data documents and archives, orders
//! them by their dependencies, and drives each one through a lifecycle state
//! machine while it contributes event handlers, commands and content records.
//!
//! ```ignore
//! use extension_host::{DescriptorLoader, ExtensionHost, ModuleRegistry};
//! use std::sync::Arc;
//!
//! let host = ExtensionHost::new();
//! let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()));
//! loader.discover_directory(&host, "./extensions");
//! let report = host.load_all();
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{ConfigError, ExtensionFault, HostError};
pub use application::messaging::EventBus;
pub use application::services::{
    CommandTable, ContentRegistry, DependencyResolver, ExtensionHost, HostOptions, Resolution,
    WeakHost,
};
pub use domain::entities::{
    CommandContext, CommandOutcome, CommandRegistration, EventCategory, ExtensionDescriptor,
    ExtensionState, HandlerReply, HookSpec, ReloadSnapshot, SourceKind,
};
pub use domain::traits::{Capabilities, Capability, Extension, ExtensionSource, HookResult};
pub use infrastructure::config::HostConfig;
pub use infrastructure::plugins::{DescriptorLoader, ModuleRegistry, ModuleSource};
pub use plugins::{DataExtension, ExtensionBuilder};
