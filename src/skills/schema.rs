//! Skill schema validation and normalization.

use serde_json::{Map, Value};
use thiserror::Error;

/// Schema validation errors, carrying every problem found in one pass.
#[derive(Error, Debug)]
pub enum SkillSchemaError {
    #[error("Skill spec must be a mapping: {0}")]
    NotAMapping(String),
    #[error("Skill schema invalid: {source_name} ({})", errors.join("; "))]
    Invalid {
        source_name: String,
        errors: Vec<String>,
    },
    #[error("Failed to parse skill document: {0}")]
    Parse(String),
}

/// A validated, immutable skill definition.
///
/// Created by the loader, owned by the registry. `spec` is the normalized
/// document: steps carry ids, `schema_version` is set.
#[derive(Debug, Clone)]
pub struct SkillDefinition {
    pub skill_id: String,
    pub name: String,
    pub version: String,
    /// Where the definition came from (file path or "<json>").
    pub source: String,
    pub spec: Map<String, Value>,
}

impl SkillDefinition {
    /// Routing metadata block, if declared.
    pub fn routing(&self) -> Option<&Map<String, Value>> {
        self.spec.get("routing").and_then(Value::as_object)
    }

    /// Skill layer level (1 = atomic, 2 = flow, 3 = recovery by convention).
    pub fn level(&self) -> Option<i64> {
        self.spec.get("level").and_then(Value::as_i64)
    }

    pub fn role(&self) -> Option<&str> {
        self.spec.get("role").and_then(Value::as_str)
    }

    pub fn owner(&self) -> Option<&str> {
        self.spec.get("owner").and_then(Value::as_str)
    }

    /// True for skills published for passive validation only.
    pub fn is_shadow(&self) -> bool {
        self.spec.get("status").and_then(Value::as_str) == Some("shadow")
    }
}

/// Validate a raw spec document and return the normalized mapping.
///
/// Required: non-empty `id`, `name`, `version` and a non-empty `steps` list
/// whose entries each declare an `action`. Steps without an `id` get a
/// synthetic `step_N` (1-based). All problems are collected before failing.
pub fn validate_skill_spec(spec: Value, source: &str) -> Result<Map<String, Value>, SkillSchemaError> {
    let spec = match spec {
        Value::Object(map) => map,
        _ => return Err(SkillSchemaError::NotAMapping(source.to_string())),
    };

    let mut errors = Vec::new();

    for key in ["id", "name", "version"] {
        let present = spec
            .get(key)
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !present {
            errors.push(format!("Missing required field: {}", key));
        }
    }

    let steps = spec.get("steps").and_then(Value::as_array);
    match steps {
        Some(list) if !list.is_empty() => {
            for (index, step) in list.iter().enumerate() {
                match step.as_object() {
                    Some(map) => {
                        let has_action = map
                            .get("action")
                            .and_then(Value::as_str)
                            .map(|s| !s.is_empty())
                            .unwrap_or(false);
                        if !has_action {
                            errors.push(format!("Step {} missing action", index));
                        }
                    }
                    None => errors.push(format!("Step {} must be a mapping", index)),
                }
            }
        }
        _ => errors.push("Field 'steps' must be a non-empty list".to_string()),
    }

    if !errors.is_empty() {
        return Err(SkillSchemaError::Invalid {
            source_name: source.to_string(),
            errors,
        });
    }

    let mut normalized = spec;
    normalized
        .entry("schema_version")
        .or_insert_with(|| Value::String("v1".to_string()));

    if let Some(Value::Array(steps)) = normalized.get_mut("steps") {
        *steps = normalize_steps(std::mem::take(steps));
    }

    Ok(normalized)
}

fn normalize_steps(steps: Vec<Value>) -> Vec<Value> {
    steps
        .into_iter()
        .enumerate()
        .filter_map(|(index, step)| match step {
            Value::Object(mut map) => {
                let missing_id = map
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|s| s.is_empty())
                    .unwrap_or(true);
                if missing_id {
                    map.insert("id".to_string(), Value::String(format!("step_{}", index + 1)));
                }
                Some(Value::Object(map))
            }
            _ => None,
        })
        .collect()
}
