//! Module registry - Named in-process extension constructors

use crate::application::errors::HostError;
use crate::domain::traits::Extension;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Builds a fresh extension instance
pub type ExtensionConstructor = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Registry of code modules that manifests can name through `entry`
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, ExtensionConstructor>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Register a constructor under `name`
    pub fn register<F>(&self, name: impl Into<String>, constructor: F) -> Result<(), HostError>
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut modules = self.modules.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;

        if modules.contains_key(&name) {
            return Err(HostError::Internal(format!("Module '{}' already registered", name)));
        }

        tracing::debug!("Registered module: {}", name);
        modules.insert(name, Arc::new(constructor));
        Ok(())
    }

    /// Get a constructor by name
    pub fn get(&self, name: &str) -> Option<ExtensionConstructor> {
        self.modules.read()
            .ok()?
            .get(name)
            .cloned()
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read()
            .ok()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read()
            .ok()
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }

    /// Remove a module
    pub fn unregister(&self, name: &str) -> Result<(), HostError> {
        let mut modules = self.modules.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;

        if modules.remove(name).is_some() {
            tracing::debug!("Unregistered module: {}", name);
            Ok(())
        } else {
            Err(HostError::NotFound(name.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.modules.read()
            .ok()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
