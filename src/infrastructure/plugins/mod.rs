//! Descriptor loader and extension sources
//!
//! Extensions are found on disk as data documents (`.json`, `.yaml`, `.toml`),
//! directories holding an `extension.*` manifest, or archives. Code is either a
//! native shared library or a constructor registered in a [`ModuleRegistry`].

pub mod fingerprint;
pub mod library;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod sources;

pub use loader::{DescriptorLoader, RejectedSources, ScanResult};
pub use manifest::{DescriptorInfo, DocumentFormat, ExtensionDocument};
pub use registry::{ExtensionConstructor, ModuleRegistry};
pub use sources::{ArchiveSource, DocumentSource, ManifestSource, ModuleSource};
