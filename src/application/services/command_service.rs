use crate::application::errors::{guarded, ExtensionFault, HostError};
use crate::domain::entities::command::normalize_command_name;
use crate::domain::entities::{CommandContext, CommandOutcome, CommandRegistration};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Runs before every handler; returning false blocks the command
pub type CommandMiddleware = Arc<dyn Fn(&str, &[String], &CommandContext) -> bool + Send + Sync>;

/// Told about every handler fault: the fault, the command name and its arguments
pub type CommandErrorHandler = Arc<dyn Fn(&ExtensionFault, &str, &[String]) + Send + Sync>;

#[derive(Default)]
struct Table {
    commands: BTreeMap<String, CommandRegistration>,
    /// alias -> canonical name
    aliases: HashMap<String, String>,
}

impl Table {
    fn canonical(&self, key: &str) -> Option<&str> {
        if self.commands.contains_key(key) {
            return Some(self.commands.get_key_value(key)?.0.as_str());
        }
        self.aliases.get(key).map(String::as_str)
    }

    fn owner_of(&self, key: &str) -> Option<&str> {
        let name = self.canonical(key)?;
        self.commands.get(name).map(|c| c.owner.as_str())
    }

    fn remove(&mut self, name: &str) -> Option<CommandRegistration> {
        let removed = self.commands.remove(name)?;
        self.aliases.retain(|_, canonical| canonical != name);
        Some(removed)
    }
}

/// Command table - maps case-normalized names and aliases to handlers
pub struct CommandTable {
    table: RwLock<Table>,
    middleware: RwLock<Vec<CommandMiddleware>>,
    error_handlers: RwLock<Vec<CommandErrorHandler>>,
    prefix: String,
}

impl CommandTable {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            middleware: RwLock::new(Vec::new()),
            error_handlers: RwLock::new(Vec::new()),
            prefix: prefix.into(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Register a command; fails if its name or any alias is taken
    pub fn register(&self, mut command: CommandRegistration, owner: &str) -> Result<(), HostError> {
        command.owner = owner.to_string();
        let mut table = self.write();

        for key in command.keys() {
            if let Some(existing) = table.owner_of(key) {
                return Err(HostError::DuplicateCommand {
                    name: key.clone(),
                    owner: existing.to_string(),
                });
            }
        }

        let name = command.name.clone();
        for alias in command.aliases.iter().filter(|a| **a != name) {
            table.aliases.insert(alias.clone(), name.clone());
        }
        tracing::debug!("Registered command {}{} for {}", self.prefix, name, owner);
        table.commands.insert(name, command);
        Ok(())
    }

    /// Remove a command by name or alias
    pub fn unregister(&self, name: &str) -> bool {
        let key = normalize_command_name(name);
        let mut table = self.write();
        let Some(canonical) = table.canonical(&key).map(str::to_string) else {
            return false;
        };
        table.remove(&canonical).is_some()
    }

    /// Remove every command (and its aliases) owned by `owner`
    pub fn unregister_all(&self, owner: &str) -> usize {
        let mut table = self.write();
        let owned: Vec<String> = table
            .commands
            .values()
            .filter(|c| c.owner == owner)
            .map(|c| c.name.clone())
            .collect();
        for name in &owned {
            table.remove(name);
        }
        if !owned.is_empty() {
            tracing::debug!("Removed {} commands owned by {}", owned.len(), owner);
        }
        owned.len()
    }

    pub fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(&str, &[String], &CommandContext) -> bool + Send + Sync + 'static,
    {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    pub fn add_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ExtensionFault, &str, &[String]) + Send + Sync + 'static,
    {
        self.error_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    fn report_fault(&self, fault: &ExtensionFault, name: &str, args: &[String]) {
        let handlers = self
            .error_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            if let Err(inner) = guarded(|| {
                handler(fault, name, args);
                Ok(())
            }) {
                tracing::warn!("Command error handler {}", inner);
            }
        }
    }

    /// Resolve, validate and run a command. Never propagates handler faults.
    pub fn execute(&self, name: &str, args: &[String], ctx: &CommandContext) -> CommandOutcome {
        let key = normalize_command_name(name);

        // Clone out of the lock so the handler may call back into the table
        let command = {
            let table = self.read();
            table
                .canonical(&key)
                .and_then(|canonical| table.commands.get(canonical))
                .cloned()
        };
        let Some(command) = command else {
            return CommandOutcome::failure(format!("Unknown command: {}", name.trim()));
        };

        if let Err(message) = command.accepts_arg_count(args.len()) {
            return CommandOutcome::failure(message);
        }

        let missing = ctx.missing_permissions(&command.permissions);
        if !missing.is_empty() {
            tracing::warn!(
                "Permission denied for {}{}: missing {}",
                self.prefix,
                command.name,
                missing.join(", ")
            );
            return CommandOutcome::failure(format!(
                "Permission denied: requires {}",
                missing.join(", ")
            ));
        }

        let middleware = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for check in middleware {
            match guarded(|| Ok(check(command.name.as_str(), args, ctx))) {
                Ok(true) => {}
                Ok(false) => return CommandOutcome::failure("Command blocked by middleware"),
                Err(fault) => {
                    tracing::error!("Command middleware {}", fault);
                    return CommandOutcome::failure("Command blocked by middleware");
                }
            }
        }

        let handler = command.handler.clone();
        match guarded(|| handler(args, ctx)) {
            Ok(message) => CommandOutcome::success(message),
            Err(fault) => {
                tracing::error!("Command {} of {} failed: {}", command.name, command.owner, fault);
                self.report_fault(&fault, &command.name, args);
                CommandOutcome::failure(format!("Command error: {}", fault))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().canonical(&normalize_command_name(name)).is_some()
    }

    pub fn get(&self, name: &str) -> Option<CommandRegistration> {
        let key = normalize_command_name(name);
        let table = self.read();
        table
            .canonical(&key)
            .and_then(|canonical| table.commands.get(canonical))
            .cloned()
    }

    /// Canonical command names, sorted
    pub fn names(&self) -> Vec<String> {
        self.read().commands.keys().cloned().collect()
    }

    /// Category -> command names
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for command in self.read().commands.values() {
            categories
                .entry(command.category.clone())
                .or_default()
                .push(command.name.clone());
        }
        categories
    }

    pub fn len(&self) -> usize {
        self.read().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn owned_by(&self, owner: &str) -> usize {
        self.read()
            .commands
            .values()
            .filter(|c| c.owner == owner)
            .count()
    }

    fn help_line(&self, command: &CommandRegistration) -> String {
        let help = if command.help.is_empty() {
            "No description"
        } else {
            command.help.as_str()
        };
        format!("{}{} - {}", self.prefix, command.name, help)
    }

    /// Help text for one command, one category, or everything
    pub fn get_help(&self, topic: Option<&str>) -> String {
        match topic {
            Some(topic) => {
                if let Some(command) = self.get(topic) {
                    let mut help = self.help_line(&command);
                    if let Some(usage) = &command.usage {
                        help.push_str(&format!("\nUsage: {}", usage));
                    }
                    if !command.aliases.is_empty() {
                        let aliases: Vec<&str> = command.aliases.iter().map(String::as_str).collect();
                        help.push_str(&format!("\nAliases: {}", aliases.join(", ")));
                    }
                    return help;
                }
                self.category_help(topic)
                    .unwrap_or_else(|| format!("Unknown command: {}", topic))
            }
            None => {
                let table = self.read();
                let mut grouped: BTreeMap<&str, Vec<&CommandRegistration>> = BTreeMap::new();
                for command in table.commands.values() {
                    grouped.entry(&command.category).or_default().push(command);
                }

                let mut help = "Available commands:".to_string();
                for (category, commands) in grouped {
                    help.push_str(&format!("\n\n[{}]", category));
                    for command in commands {
                        help.push_str(&format!("\n  {}", self.help_line(command)));
                    }
                }
                help
            }
        }
    }

    fn category_help(&self, category: &str) -> Option<String> {
        let table = self.read();
        let lines: Vec<String> = table
            .commands
            .values()
            .filter(|c| c.category.eq_ignore_ascii_case(category))
            .map(|c| format!("  {}", self.help_line(c)))
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(format!("[{}]\n{}", category, lines.join("\n")))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new("/")
    }
}
