use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A content record contributed by an extension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentEntry {
    pub content_type: String,
    pub id: String,
    pub payload: Value,
    pub owner: String,
    pub registered_at: DateTime<Utc>,
}

/// Content contributed by one extension: type -> id -> payload
pub type ContentBundle = BTreeMap<String, BTreeMap<String, Value>>;
