//! Extension document format
//!
//! Every declarative source (manifest, data document, archive) shares one
//! layout: an `info` section describing the extension, optional `library` /
//! `entry` keys naming code, and any number of named content sections.
//!
//! ```yaml
//! info:
//!   id: extended_items
//!   version: 1.2.0
//!   dependencies: [core]
//!   priority: 40
//! items:
//!   flame_sword: { name: Flame Sword, damage: 12 }
//! ```

use crate::application::errors::HostError;
use crate::domain::entities::descriptor::DEFAULT_LOAD_PRIORITY;
use crate::domain::entities::{ContentBundle, Dependencies, ExtensionDescriptor, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Top-level keys that are not content sections
const RESERVED_KEYS: &[&str] = &["info", "library", "entry"];

/// Serialization format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "toml" => Some(DocumentFormat::Toml),
            _ => None,
        }
    }

    pub fn parse(&self, text: &str) -> Result<Value, String> {
        match self {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            DocumentFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

/// The `info` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DescriptorInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    /// String or bare number (`1.2` in YAML)
    pub version: Option<Value>,
    pub author: Option<String>,
    pub description: String,
    pub dependencies: Vec<String>,
    #[serde(alias = "soft-dependencies")]
    pub soft_dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    pub provides: Vec<String>,
    pub priority: Option<i32>,
    pub tags: Vec<String>,
    #[serde(alias = "config-schema")]
    pub config_schema: Option<Value>,
    #[serde(alias = "default-config")]
    pub default_config: Option<Value>,
    #[serde(alias = "supports-hot-reload")]
    pub supports_hot_reload: bool,
    pub homepage: Option<String>,
    pub license: Option<String>,
}

/// Parse a version, padding a missing minor or patch component
fn parse_version(raw: &str) -> Result<semver::Version, String> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(raw) {
        return Ok(version);
    }
    let padded = match raw.matches('.').count() {
        0 => format!("{}.0.0", raw),
        1 => format!("{}.0", raw),
        _ => raw.to_string(),
    };
    semver::Version::parse(&padded).map_err(|e| format!("invalid version '{}': {}", raw, e))
}

impl DescriptorInfo {
    /// Normalize into a descriptor; `fallback_id` is used when `id` is absent
    pub fn into_descriptor(
        self,
        fallback_id: &str,
        kind: SourceKind,
    ) -> Result<ExtensionDescriptor, String> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        let version = match &self.version {
            Some(Value::String(raw)) => parse_version(raw)?,
            // `1.10` arrives as a float and would read back as 1.1
            Some(Value::Number(raw)) if raw.is_u64() => parse_version(&raw.to_string())?,
            Some(Value::Number(raw)) => {
                return Err(format!("version {} must be quoted, e.g. \"{}\"", raw, raw))
            }
            None | Some(Value::Null) => semver::Version::new(1, 0, 0),
            Some(other) => return Err(format!("invalid version {}", other)),
        };

        let mut descriptor = ExtensionDescriptor::new(id.clone(), kind);
        descriptor.name = self.name.unwrap_or(id);
        descriptor.version = version;
        if let Some(author) = self.author {
            descriptor.author = author;
        }
        descriptor.description = self.description;
        descriptor.dependencies = Dependencies {
            required: self.dependencies.into_iter().collect(),
            soft: self.soft_dependencies.into_iter().collect(),
            conflicts: self.conflicts.into_iter().collect(),
        };
        descriptor.priority = self.priority.unwrap_or(DEFAULT_LOAD_PRIORITY);
        descriptor.tags = self.tags.into_iter().collect::<BTreeSet<_>>();
        descriptor.provides = self.provides.into_iter().collect();
        descriptor.config_schema = self.config_schema.filter(|v| !v.is_null());
        descriptor.default_config = self.default_config.filter(|v| !v.is_null());
        descriptor.supports_hot_reload = self.supports_hot_reload;
        descriptor.homepage = self.homepage.filter(|s| !s.is_empty());
        descriptor.license = self.license.filter(|s| !s.is_empty());
        Ok(descriptor)
    }
}

/// A parsed extension document
#[derive(Debug, Clone, Default)]
pub struct ExtensionDocument {
    pub info: DescriptorInfo,
    /// Shared library, relative to the document
    pub library: Option<PathBuf>,
    /// Exported symbol or registered module name
    pub entry: Option<String>,
    pub content: ContentBundle,
}

impl ExtensionDocument {
    pub fn parse(text: &str, format: DocumentFormat, source_name: &str) -> Result<Self, HostError> {
        let value = format
            .parse(text)
            .map_err(|e| HostError::malformed(source_name, e))?;
        Self::from_value(value, source_name)
    }

    pub fn from_value(value: Value, source_name: &str) -> Result<Self, HostError> {
        let Value::Object(mut root) = value else {
            return Err(HostError::malformed(source_name, "document root must be a mapping"));
        };

        let info = match root.remove("info") {
            Some(Value::Object(info)) => serde_json::from_value(Value::Object(info))
                .map_err(|e| HostError::malformed(source_name, format!("invalid info section: {}", e)))?,
            Some(Value::Null) | None => {
                return Err(HostError::malformed(source_name, "missing info section"))
            }
            Some(_) => return Err(HostError::malformed(source_name, "info must be a mapping")),
        };

        let library = match root.remove("library") {
            Some(Value::String(path)) => Some(PathBuf::from(path)),
            None | Some(Value::Null) => None,
            Some(_) => return Err(HostError::malformed(source_name, "library must be a string")),
        };
        let entry = match root.remove("entry") {
            Some(Value::String(entry)) => Some(entry),
            None | Some(Value::Null) => None,
            Some(_) => return Err(HostError::malformed(source_name, "entry must be a string")),
        };

        let mut content = ContentBundle::new();
        for (section, records) in root {
            if RESERVED_KEYS.contains(&section.as_str()) {
                continue;
            }
            match records {
                Value::Object(records) => {
                    content.insert(section, records.into_iter().collect());
                }
                Value::Null => {}
                _ => {
                    return Err(HostError::malformed(
                        source_name,
                        format!("content section '{}' must be a mapping of id to record", section),
                    ))
                }
            }
        }

        Ok(Self {
            info,
            library,
            entry,
            content,
        })
    }

    /// Whether this document names code rather than carrying only data
    pub fn has_code(&self) -> bool {
        self.library.is_some() || self.entry.is_some()
    }

    pub fn descriptor(&self, fallback_id: &str, kind: SourceKind, source_name: &str) -> Result<ExtensionDescriptor, HostError> {
        self.info
            .clone()
            .into_descriptor(fallback_id, kind)
            .map_err(|e| HostError::malformed(source_name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_document_sections() {
        let text = r#"
info:
  name: Extended Items
  version: "1.2"
  dependencies: [core]
  soft-dependencies: [weather]
  priority: 40
  tags: [items]
items:
  flame_sword:
    name: Flame Sword
"#;
        let document = ExtensionDocument::parse(text, DocumentFormat::Yaml, "items.yaml").unwrap();
        assert!(!document.has_code());
        assert_eq!(document.content["items"]["flame_sword"], json!({"name": "Flame Sword"}));

        let descriptor = document
            .descriptor("extended_items", SourceKind::Document, "items.yaml")
            .unwrap();
        assert_eq!(descriptor.id, "extended_items");
        assert_eq!(descriptor.version, semver::Version::new(1, 2, 0));
        assert!(descriptor.dependencies.required.contains("core"));
        assert!(descriptor.dependencies.soft.contains("weather"));
        assert_eq!(descriptor.priority, 40);
    }

    #[test]
    fn test_toml_manifest_with_entry() {
        let text = r#"
entry = "weather"

[info]
id = "weather"
supports_hot_reload = true
"#;
        let document = ExtensionDocument::parse(text, DocumentFormat::Toml, "extension.toml").unwrap();
        assert_eq!(document.entry.as_deref(), Some("weather"));
        let descriptor = document
            .descriptor("dir", SourceKind::Module, "extension.toml")
            .unwrap();
        assert_eq!(descriptor.id, "weather");
        assert_eq!(descriptor.priority, DEFAULT_LOAD_PRIORITY);
        assert!(descriptor.supports_hot_reload);
    }

    #[test]
    fn test_malformed_documents() {
        let missing = ExtensionDocument::parse(r#"{"items": {}}"#, DocumentFormat::Json, "a.json");
        assert_eq!(missing.unwrap_err().kind(), "MalformedSource");

        let bad_section =
            ExtensionDocument::parse(r#"{"info": {}, "items": [1, 2]}"#, DocumentFormat::Json, "b.json");
        assert_eq!(bad_section.unwrap_err().kind(), "MalformedSource");

        let bad_version = ExtensionDocument::parse(
            r#"{"info": {"version": "one"}}"#,
            DocumentFormat::Json,
            "c.json",
        )
        .unwrap()
        .descriptor("c", SourceKind::Document, "c.json");
        assert_eq!(bad_version.unwrap_err().kind(), "MalformedSource");
    }

    #[test]
    fn test_numeric_versions() {
        let whole = ExtensionDocument::parse("info:\n  version: 2\n", DocumentFormat::Yaml, "w.yaml")
            .unwrap()
            .descriptor("w", SourceKind::Document, "w.yaml")
            .unwrap();
        assert_eq!(whole.version, semver::Version::new(2, 0, 0));

        let err = ExtensionDocument::parse("info:\n  version: 1.10\n", DocumentFormat::Yaml, "f.yaml")
            .unwrap()
            .descriptor("f", SourceKind::Document, "f.yaml")
            .unwrap_err();
        assert_eq!(err.kind(), "MalformedSource");
        assert!(err.to_string().contains("must be quoted"));

        let quoted = ExtensionDocument::parse("info:\n  version: \"1.10\"\n", DocumentFormat::Yaml, "q.yaml")
            .unwrap()
            .descriptor("q", SourceKind::Document, "q.yaml")
            .unwrap();
        assert_eq!(quoted.version, semver::Version::new(1, 10, 0));
    }
}
