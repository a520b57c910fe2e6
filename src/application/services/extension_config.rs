//! Per-extension configuration: defaults, overrides and schema checks

use serde_json::{Map, Value};

/// Recursively merge `overlay` into `base`; non-object values replace
pub fn merge_config(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                let next = match merged.get(key) {
                    Some(existing) => merge_config(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

/// Effective configuration: descriptor defaults with host overrides on top
pub fn effective_config(defaults: Option<&Value>, overrides: Option<&Value>) -> Value {
    let base = defaults.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    match overrides {
        Some(overrides) => merge_config(&base, overrides),
        None => base,
    }
}

fn type_matches(expected: &str, value: &Value) -> Option<bool> {
    let matches = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" | "bool" => value.is_boolean(),
        "array" | "list" => value.is_array(),
        "object" | "map" => value.is_object(),
        "any" => true,
        _ => return None,
    };
    Some(matches)
}

/// Check `values` against a schema mapping key -> type name.
///
/// A schema entry may also be an object with a `type` field and an optional
/// `required` flag. Keys missing from the schema are accepted.
pub fn validate_config(schema: Option<&Value>, values: &Value) -> Result<(), String> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let Value::Object(schema) = schema else {
        return Err("configuration schema must be a mapping".to_string());
    };
    let Value::Object(values) = values else {
        return Err("configuration must be a mapping".to_string());
    };

    for (key, rule) in schema {
        let (expected, required) = match rule {
            Value::String(name) => (name.as_str(), false),
            Value::Object(rule) => (
                rule.get("type").and_then(Value::as_str).unwrap_or("any"),
                rule.get("required").and_then(Value::as_bool).unwrap_or(false),
            ),
            _ => return Err(format!("invalid schema entry for '{}'", key)),
        };

        match values.get(key) {
            None if required => return Err(format!("missing required key '{}'", key)),
            None | Some(Value::Null) => {}
            Some(value) => match type_matches(expected, value) {
                Some(true) => {}
                Some(false) => {
                    return Err(format!("'{}' must be of type {}, got {}", key, expected, value))
                }
                None => return Err(format!("unknown schema type '{}' for '{}'", expected, key)),
            },
        }
    }
    Ok(())
}
