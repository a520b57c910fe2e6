//! Application layer - Extension lifecycle and the shared registries
//!
//! This layer contains:
//! - Services: Lifecycle manager, resolver, command table, content registry
//! - Messaging: Event bus, middleware, command line parsing
//! - Errors: Host error types

pub mod errors;
pub mod services;
pub mod messaging;
