//! Content registry - dynamically typed records contributed by extensions

use crate::application::errors::{guarded, ExtensionFault, HostError};
use crate::domain::entities::{ContentBundle, ContentEntry};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Accepts or rejects a payload with a reason
pub type ContentValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Builds a payload from an id and parameters
pub type ContentFactory = Arc<dyn Fn(&str, &Value) -> Result<Value, ExtensionFault> + Send + Sync>;

/// Content types every host starts with
pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "items",
    "enemies",
    "locations",
    "npcs",
    "quests",
    "recipes",
    "abilities",
    "world_events",
];

/// How a content type is checked and constructed
#[derive(Clone, Default)]
pub struct ContentType {
    validator: Option<ContentValidator>,
    factory: Option<ContentFactory>,
    metadata: BTreeMap<String, Value>,
}

impl ContentType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, ExtensionFault> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// The shape used by the default types: an object with a `name` field
    pub fn named_record() -> Self {
        Self::new()
            .with_validator(require_name)
            .with_factory(build_record)
    }
}

fn require_name(payload: &Value) -> Result<(), String> {
    match payload {
        Value::Object(map) if map.contains_key("name") => Ok(()),
        Value::Object(_) => Err("missing required field 'name'".to_string()),
        _ => Err("payload must be an object".to_string()),
    }
}

fn build_record(id: &str, params: &Value) -> Result<Value, ExtensionFault> {
    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(id.to_string()));
    match params {
        Value::Object(fields) => record.extend(fields.clone()),
        Value::Null => {}
        other => return Err(ExtensionFault::new(format!("parameters must be an object, got {}", other))),
    }
    Ok(Value::Object(record))
}

/// Outcome of a batch registration
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    pub registered: usize,
    pub failures: Vec<HostError>,
}

impl BatchReport {
    fn merge(&mut self, other: BatchReport) {
        self.registered += other.registered;
        self.failures.extend(other.failures);
    }
}

/// Per-type entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Store {
    types: BTreeMap<String, ContentType>,
    entries: BTreeMap<String, BTreeMap<String, ContentEntry>>,
}

/// Dynamically typed content store keyed by (type, id)
pub struct ContentRegistry {
    store: RwLock<Store>,
}

impl ContentRegistry {
    /// Empty registry with no known types
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::default()),
        }
    }

    /// Registry preloaded with the default game content types
    pub fn with_default_types() -> Self {
        let registry = Self::new();
        for name in DEFAULT_CONTENT_TYPES {
            registry.register_type(*name, ContentType::named_record());
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Define (or redefine) how a content type is validated and constructed
    pub fn register_type(&self, content_type: impl Into<String>, definition: ContentType) {
        let content_type = content_type.into();
        tracing::debug!("Registered content type {}", content_type);
        self.write().types.insert(content_type, definition);
    }

    pub fn content_type(&self, content_type: &str) -> Option<ContentType> {
        self.read().types.get(content_type).cloned()
    }

    /// Validate and store one record
    pub fn register(
        &self,
        content_type: &str,
        id: &str,
        payload: Value,
        owner: &str,
    ) -> Result<(), HostError> {
        let validator = self
            .read()
            .types
            .get(content_type)
            .and_then(|t| t.validator.clone());

        if let Some(validator) = validator {
            let verdict = guarded(|| Ok(validator(&payload)))
                .unwrap_or_else(|fault| Err(fault.to_string()));
            if let Err(reason) = verdict {
                tracing::warn!("Validation failed for {}:{}: {}", content_type, id, reason);
                return Err(HostError::ValidationFailed {
                    content_type: content_type.to_string(),
                    id: id.to_string(),
                    reason,
                });
            }
        }

        let mut store = self.write();
        let entries = store.entries.entry(content_type.to_string()).or_default();
        if entries.contains_key(id) {
            return Err(HostError::DuplicateContentId {
                content_type: content_type.to_string(),
                id: id.to_string(),
            });
        }
        entries.insert(
            id.to_string(),
            ContentEntry {
                content_type: content_type.to_string(),
                id: id.to_string(),
                payload,
                owner: owner.to_string(),
                registered_at: chrono::Utc::now(),
            },
        );
        tracing::debug!("Registered {}:{}", content_type, id);
        Ok(())
    }

    /// Register every record of one type; failures do not stop the batch
    pub fn register_batch<I>(&self, content_type: &str, records: I, owner: &str) -> BatchReport
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut report = BatchReport::default();
        for (id, payload) in records {
            match self.register(content_type, &id, payload, owner) {
                Ok(()) => report.registered += 1,
                Err(e) => report.failures.push(e),
            }
        }
        report
    }

    /// Register a whole type -> id -> payload bundle
    pub fn register_bundle(&self, bundle: ContentBundle, owner: &str) -> BatchReport {
        let mut report = BatchReport::default();
        for (content_type, records) in bundle {
            report.merge(self.register_batch(&content_type, records, owner));
        }
        report
    }

    pub fn unregister(&self, content_type: &str, id: &str) -> bool {
        let mut store = self.write();
        let removed = store
            .entries
            .get_mut(content_type)
            .and_then(|entries| entries.remove(id))
            .is_some();
        store.entries.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Remove exactly the entries owned by `owner`
    pub fn unregister_all(&self, owner: &str) -> usize {
        let mut store = self.write();
        let mut count = 0;
        for entries in store.entries.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| entry.owner != owner);
            count += before - entries.len();
        }
        store.entries.retain(|_, entries| !entries.is_empty());
        if count > 0 {
            tracing::debug!("Removed {} content entries owned by {}", count, owner);
        }
        count
    }

    pub fn get(&self, content_type: &str, id: &str) -> Option<Value> {
        self.entry(content_type, id).map(|entry| entry.payload)
    }

    pub fn entry(&self, content_type: &str, id: &str) -> Option<ContentEntry> {
        self.read()
            .entries
            .get(content_type)
            .and_then(|entries| entries.get(id))
            .cloned()
    }

    /// All payloads of one type, keyed by id
    pub fn get_all(&self, content_type: &str) -> BTreeMap<String, Value> {
        self.read()
            .entries
            .get(content_type)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// (id, payload) pairs of one type accepted by `predicate`
    pub fn query<P>(&self, content_type: &str, predicate: P) -> Vec<(String, Value)>
    where
        P: Fn(&str, &Value) -> bool,
    {
        self.read()
            .entries
            .get(content_type)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(id, entry)| predicate(id, &entry.payload))
                    .map(|(id, entry)| (id.clone(), entry.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build a payload with the type's factory without storing it
    pub fn create(&self, content_type: &str, id: &str, params: &Value) -> Result<Value, HostError> {
        let factory = self
            .read()
            .types
            .get(content_type)
            .and_then(|t| t.factory.clone())
            .ok_or_else(|| HostError::NotFound(format!("content factory for '{}'", content_type)))?;

        guarded(|| factory(id, params)).map_err(|fault| HostError::ValidationFailed {
            content_type: content_type.to_string(),
            id: id.to_string(),
            reason: fault.to_string(),
        })
    }

    /// Known type names: declared types plus any type holding entries
    pub fn types(&self) -> Vec<String> {
        let store = self.read();
        let mut names: Vec<String> = store.types.keys().cloned().collect();
        for name in store.entries.keys() {
            if !store.types.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Drop entries of one type, or of every type
    pub fn clear(&self, content_type: Option<&str>) {
        let mut store = self.write();
        match content_type {
            Some(name) => {
                store.entries.remove(name);
            }
            None => store.entries.clear(),
        }
    }

    pub fn owned_by(&self, owner: &str) -> usize {
        self.read()
            .entries
            .values()
            .flat_map(|entries| entries.values())
            .filter(|entry| entry.owner == owner)
            .count()
    }

    pub fn stats(&self) -> ContentStats {
        let store = self.read();
        let by_type: BTreeMap<String, usize> = store
            .entries
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect();
        ContentStats {
            total: by_type.values().sum(),
            by_type,
        }
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::with_default_types()
    }
}
