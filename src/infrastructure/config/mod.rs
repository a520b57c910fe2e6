//! Configuration management

use crate::application::errors::ConfigError;
use crate::application::services::HostOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostConfig {
    pub host: HostSection,
    pub extensions: ExtensionsConfig,
    pub hot_reload: HotReloadConfig,
    /// Extension id -> configuration merged over the descriptor defaults
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostSection {
    pub name: String,
    pub command_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionsConfig {
    pub directories: Vec<PathBuf>,
    #[serde(default)]
    pub recursive: bool,
    pub auto_load: bool,
    /// Ids never loaded automatically
    #[serde(default)]
    pub disabled: BTreeSet<String>,
    /// Ids that win dependency conflicts
    #[serde(default)]
    pub preferred: BTreeSet<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSection {
                name: "extension-host".to_string(),
                command_prefix: "/".to_string(),
            },
            extensions: ExtensionsConfig {
                directories: vec![PathBuf::from("./extensions")],
                recursive: false,
                auto_load: true,
                disabled: BTreeSet::new(),
                preferred: BTreeSet::new(),
            },
            hot_reload: HotReloadConfig {
                enabled: false,
                interval_seconds: 2,
            },
            overrides: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, else defaults; environment overrides apply either way
    pub fn load_or_default(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env()
    }

    /// Apply `EXTENSION_HOST_DIR` and `EXTENSION_HOST_HOT_RELOAD`
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(dir) = std::env::var("EXTENSION_HOST_DIR") {
            self.extensions.directories = std::env::split_paths(&dir).collect();
        }

        if let Ok(flag) = std::env::var("EXTENSION_HOST_HOT_RELOAD") {
            self.hot_reload.enabled = match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "EXTENSION_HOST_HOT_RELOAD must be a boolean, got '{}'",
                        other
                    )))
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hot_reload.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "hot-reload.interval-seconds must be positive".to_string(),
            ));
        }
        if self.host.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue(
                "host.command-prefix must not contain whitespace".to_string(),
            ));
        }
        Ok(())
    }

    /// Options for constructing an `ExtensionHost`
    pub fn host_options(&self) -> Result<HostOptions, ConfigError> {
        let mut overrides = std::collections::HashMap::new();
        for (id, values) in &self.overrides {
            let values: Value = serde_json::to_value(values).map_err(|e| {
                ConfigError::InvalidValue(format!("overrides for '{}': {}", id, e))
            })?;
            overrides.insert(id.clone(), values);
        }

        Ok(HostOptions {
            name: self.host.name.clone(),
            command_prefix: self.host.command_prefix.clone(),
            preferred: self.extensions.preferred.clone(),
            disabled: self.extensions.disabled.clone(),
            overrides,
            builtin_commands: true,
        })
    }

    /// Polling interval for hot reload, `None` when it is switched off
    pub fn reload_interval(&self) -> Option<Duration> {
        self.hot_reload
            .enabled
            .then(|| Duration::from_secs(self.hot_reload.interval_seconds))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}
