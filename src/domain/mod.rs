//! Domain layer - Core types with no knowledge of sources or storage
//! 
//! This layer contains:
//! - Entities: Descriptors, states, events, commands, content records
//! - Traits: The extension capability interface

pub mod entities;
pub mod traits;
