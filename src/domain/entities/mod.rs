//! Domain entities - Core objects the host manages

pub mod command;
pub mod content;
pub mod descriptor;
pub mod event;
pub mod snapshot;
pub mod state;

pub use command::{CommandContext, CommandHandler, CommandOutcome, CommandRegistration};
pub use content::{ContentBundle, ContentEntry};
pub use descriptor::{Dependencies, ExtensionDescriptor, SourceKind};
pub use event::{
    DispatchResult, EventCategory, EventFilter, EventHandler, HandlerPriority, HandlerReply,
    HookSpec, Propagation, SubscriptionHandle,
};
pub use snapshot::ReloadSnapshot;
pub use state::ExtensionState;

/// Owner id used for registrations made by the host itself
pub const HOST_OWNER: &str = "host";
