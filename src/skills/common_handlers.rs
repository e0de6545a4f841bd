//! Shared error-handler documents merged into every skill run.

use serde_json::Value;
use std::path::Path;

/// Load common handlers from a YAML file.
///
/// Accepts either a top-level list of handlers or a mapping with an
/// `error_handlers` key. A missing or malformed file yields no handlers;
/// the run then falls back to skill-local handling only.
pub fn load_common_handlers(path: &Path) -> Vec<Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    let data: Value = match serde_yaml::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("common handlers {} malformed: {}", path.display(), e);
            return Vec::new();
        }
    };

    let handlers = match data {
        Value::Array(list) => list,
        Value::Object(mut map) => match map.remove("error_handlers") {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    handlers.into_iter().filter(|h| h.is_object()).collect()
}
