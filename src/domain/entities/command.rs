use crate::application::errors::ExtensionFault;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Command handler function type
pub type CommandHandler =
    Arc<dyn Fn(&[String], &CommandContext) -> Result<String, ExtensionFault> + Send + Sync>;

/// Represents a registered command
#[derive(Clone)]
pub struct CommandRegistration {
    pub name: String,
    pub owner: String,
    pub help: String,
    pub usage: Option<String>,
    pub category: String,
    pub aliases: BTreeSet<String>,
    pub min_args: usize,
    /// `None` means unlimited
    pub max_args: Option<usize>,
    pub permissions: BTreeSet<String>,
    pub handler: CommandHandler,
}

impl CommandRegistration {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[String], &CommandContext) -> Result<String, ExtensionFault> + Send + Sync + 'static,
    {
        Self {
            name: normalize_command_name(&name.into()),
            owner: String::new(),
            help: String::new(),
            usage: None,
            category: "general".to_string(),
            aliases: BTreeSet::new(),
            min_args: 0,
            max_args: None,
            permissions: BTreeSet::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(normalize_command_name(&alias.into()));
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            self.aliases.insert(normalize_command_name(&alias.into()));
        }
        self
    }

    pub fn with_args(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Every key (name and aliases) this registration occupies in the table
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.name).chain(self.aliases.iter().filter(move |a| **a != self.name))
    }

    pub fn usage_text(&self) -> &str {
        self.usage.as_deref().unwrap_or(&self.help)
    }

    pub fn accepts_arg_count(&self, count: usize) -> Result<(), String> {
        if count < self.min_args {
            return Err(format!("Too few arguments. Usage: {}", self.usage_text()));
        }
        if let Some(max) = self.max_args {
            if count > max {
                return Err(format!("Too many arguments. Usage: {}", self.usage_text()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistration")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("category", &self.category)
            .field("aliases", &self.aliases)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Case-normalize a command name or alias
pub fn normalize_command_name(name: &str) -> String {
    name.trim().trim_start_matches('/').to_lowercase()
}

/// Caller context passed to command handlers
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub caller: Option<String>,
    pub permissions: BTreeSet<String>,
    pub data: HashMap<String, String>,
}

impl CommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_caller(caller: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            ..Self::default()
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Get data from context
    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }

    /// Set data in context
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn missing_permissions<'a>(&self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .iter()
            .filter(|p| !self.permissions.contains(*p))
            .map(|p| p.as_str())
            .collect()
    }
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
