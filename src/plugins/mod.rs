//! Extension adapters
//!
//! Turn declarative documents and builder-style definitions into `Extension`
//! objects the host can drive.

pub mod builder;
pub mod data;

pub use builder::ExtensionBuilder;
pub use data::DataExtension;
