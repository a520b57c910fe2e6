//! Application layer errors

use thiserror::Error;

/// Errors produced by the extension host
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("Malformed source {source_name}: {reason}")]
    MalformedSource { source_name: String, reason: String },

    #[error("Extension '{id}' is missing required dependency '{dependency}'")]
    MissingDependency { id: String, dependency: String },

    #[error("Extension '{id}' is part of a dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency { id: String, cycle: Vec<String> },

    #[error("Extension '{id}' conflicts with '{other}'")]
    ConflictingExtension { id: String, other: String },

    #[error("Command name or alias '{name}' is already registered by '{owner}'")]
    DuplicateCommand { name: String, owner: String },

    #[error("Content {content_type}:{id} is already registered")]
    DuplicateContentId { content_type: String, id: String },

    #[error("Validation failed for {content_type}:{id}: {reason}")]
    ValidationFailed { content_type: String, id: String, reason: String },

    #[error("Hook '{hook}' failed for extension '{id}': {reason}")]
    HookFailure { id: String, hook: String, reason: String },

    #[error("Extension '{id}' is already in a transition ({operation})")]
    ReentrantTransition { id: String, operation: String },

    #[error("Reload of '{id}' failed: {reason}")]
    ReloadFailure { id: String, reason: String },

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} extension '{id}' while it is {state}")]
    InvalidTransition { id: String, operation: String, state: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        HostError::MalformedSource {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn hook(id: impl Into<String>, hook: impl Into<String>, fault: &ExtensionFault) -> Self {
        HostError::HookFailure {
            id: id.into(),
            hook: hook.into(),
            reason: fault.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::MalformedSource { .. } => "MalformedSource",
            HostError::MissingDependency { .. } => "MissingDependency",
            HostError::CyclicDependency { .. } => "CyclicDependency",
            HostError::ConflictingExtension { .. } => "ConflictingExtension",
            HostError::DuplicateCommand { .. } => "DuplicateCommand",
            HostError::DuplicateContentId { .. } => "DuplicateContentId",
            HostError::ValidationFailed { .. } => "ValidationFailed",
            HostError::HookFailure { .. } => "HookFailure",
            HostError::ReentrantTransition { .. } => "ReentrantTransition",
            HostError::ReloadFailure { .. } => "ReloadFailure",
            HostError::NotFound(_) => "NotFound",
            HostError::InvalidTransition { .. } => "InvalidTransition",
            HostError::Config(_) => "Config",
            HostError::Internal(_) => "Internal",
        }
    }
}

/// A failure signalled (or a panic raised) by extension code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExtensionFault {
    pub message: String,
}

impl ExtensionFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Convert a caught panic payload into a fault
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panicked: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panicked: {}", s)
        } else {
            "panicked with unknown payload".to_string()
        };
        Self { message }
    }
}

impl From<&str> for ExtensionFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExtensionFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Run extension code, turning panics into faults
pub fn guarded<T>(f: impl FnOnce() -> Result<T, ExtensionFault>) -> Result<T, ExtensionFault> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ExtensionFault::from_panic(payload)),
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
