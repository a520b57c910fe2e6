//! Application services - Lifecycle, dependency resolution and the registries

pub mod builtin;
pub mod command_service;
pub mod content_service;
pub mod extension_config;
pub mod lifecycle;
pub mod reload;
pub mod resolver;

pub use command_service::{CommandMiddleware, CommandTable};
pub use content_service::{BatchReport, ContentRegistry, ContentStats, ContentType};
pub use lifecycle::{
    DiscoveryReport, ExtensionHost, ExtensionSummary, HostOptions, HostStats, LoadReport,
    UnloadSummary, WeakHost,
};
pub use reload::ReloadOutcome;
pub use resolver::{DependencyResolver, Resolution};
