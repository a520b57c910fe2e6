use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ExtensionState {
    Undiscovered,
    Discovered,
    Loading,
    Resolving,
    Initializing,
    Enabled,
    Disabled,
    Error(String),
    Unloading,
    PendingReload,
    HotReloading,
}

impl ExtensionState {
    pub fn name(&self) -> &'static str {
        match self {
            ExtensionState::Undiscovered => "undiscovered",
            ExtensionState::Discovered => "discovered",
            ExtensionState::Loading => "loading",
            ExtensionState::Resolving => "resolving",
            ExtensionState::Initializing => "initializing",
            ExtensionState::Enabled => "enabled",
            ExtensionState::Disabled => "disabled",
            ExtensionState::Error(_) => "error",
            ExtensionState::Unloading => "unloading",
            ExtensionState::PendingReload => "pending_reload",
            ExtensionState::HotReloading => "hot_reloading",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ExtensionState::Enabled)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExtensionState::Error(_))
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &ExtensionState) -> bool {
        use ExtensionState::*;
        match (self, next) {
            (Undiscovered, Discovered) => true,
            (Discovered | Error(_), Loading) => true,
            (PendingReload, Loading) => true,
            (Loading, Resolving) => true,
            (Resolving, Initializing) => true,
            (Initializing, Enabled | HotReloading) => true,
            (HotReloading, Enabled) => true,
            (Loading | Resolving | Initializing | HotReloading, Error(_)) => true,
            (Enabled, Disabled | PendingReload | Unloading | Error(_)) => true,
            (Disabled, Enabled | Unloading | Error(_)) => true,
            (Error(_), Unloading) => true,
            (PendingReload, Unloading | Error(_)) => true,
            (Unloading, Discovered | PendingReload) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionState::Error(reason) => write!(f, "error ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}
