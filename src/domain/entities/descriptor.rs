//! Extension descriptor - normalized metadata independent of source format

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Load priority used when a source does not declare one
pub const DEFAULT_LOAD_PRIORITY: i32 = 100;

static EXTENSION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("extension id pattern is valid")
});

/// Check that a string is usable as an extension id
pub fn is_valid_extension_id(id: &str) -> bool {
    id != crate::domain::entities::HOST_OWNER && EXTENSION_ID.is_match(id)
}

/// Format an extension was discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Code module: in-process constructor or native library
    Module,
    /// Structured-data document (JSON, YAML, TOML)
    Document,
    /// Archive bundle wrapping one of the above
    Archive,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Module => "module",
            SourceKind::Document => "document",
            SourceKind::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// Dependency lists of an extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Must be present and enabled before this extension loads
    pub required: BTreeSet<String>,
    /// Ordered before this extension when present
    pub soft: BTreeSet<String>,
    /// Must not be enabled together with this extension
    pub conflicts: BTreeSet<String>,
}

/// Normalized metadata record for an extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    pub version: semver::Version,
    pub author: String,
    pub description: String,
    pub dependencies: Dependencies,
    /// Lower loads earlier
    pub priority: i32,
    pub tags: BTreeSet<String>,
    /// Capability names this extension provides; two providers of one name conflict
    pub provides: BTreeSet<String>,
    pub config_schema: Option<serde_json::Value>,
    pub default_config: Option<serde_json::Value>,
    pub supports_hot_reload: bool,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub kind: SourceKind,
}

impl ExtensionDescriptor {
    pub fn new(id: impl Into<String>, kind: SourceKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: semver::Version::new(1, 0, 0),
            author: "Unknown".to_string(),
            description: String::new(),
            dependencies: Dependencies::default(),
            priority: DEFAULT_LOAD_PRIORITY,
            tags: BTreeSet::new(),
            provides: BTreeSet::new(),
            config_schema: None,
            default_config: None,
            supports_hot_reload: false,
            homepage: None,
            license: None,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires(mut self, id: impl Into<String>) -> Self {
        self.dependencies.required.insert(id.into());
        self
    }

    pub fn soft_requires(mut self, id: impl Into<String>) -> Self {
        self.dependencies.soft.insert(id.into());
        self
    }

    pub fn conflicts_with(mut self, id: impl Into<String>) -> Self {
        self.dependencies.conflicts.insert(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Every id this extension must be ordered after, present or not
    pub fn ordering_dependencies(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .required
            .iter()
            .chain(self.dependencies.soft.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_id_validation() {
        assert!(is_valid_extension_id("extended_items"));
        assert!(is_valid_extension_id("combat-2.0"));
        assert!(!is_valid_extension_id(""));
        assert!(!is_valid_extension_id("_hidden"));
        assert!(!is_valid_extension_id("has space"));
        assert!(!is_valid_extension_id("host"));
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = ExtensionDescriptor::new("greeter", SourceKind::Module)
            .requires("core")
            .soft_requires("extras")
            .conflicts_with("legacy");

        assert_eq!(desc.name, "greeter");
        assert_eq!(desc.priority, DEFAULT_LOAD_PRIORITY);
        assert_eq!(desc.version.to_string(), "1.0.0");
        let deps: Vec<_> = desc.ordering_dependencies().cloned().collect();
        assert_eq!(deps, vec!["core".to_string(), "extras".to_string()]);
    }
}
