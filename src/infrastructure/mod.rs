//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Host configuration loading
//! - Plugins: Extension discovery on disk, native libraries, module registry

pub mod config;
pub mod plugins;
