//! Skill file loading (YAML or JSON documents).

use serde_json::Value;
use std::path::Path;

use crate::skills::schema::{validate_skill_spec, SkillDefinition, SkillSchemaError};
use crate::skills::vocab::merge_vocab_file;

/// Load a skill definition from a `.yml`/`.yaml`/`.json` file.
///
/// A `vocab_path` field is resolved relative to the skill file and merged
/// into the spec's `vocab` map before validation (inline entries win).
pub fn load_skill_file(path: &Path) -> Result<SkillDefinition, SkillSchemaError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SkillSchemaError::Parse(format!("{}: {}", path.display(), e)))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let spec: Value = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| SkillSchemaError::Parse(format!("{}: {}", path.display(), e)))?
    } else {
        serde_yaml::from_str(&raw)
            .map_err(|e| SkillSchemaError::Parse(format!("{}: {}", path.display(), e)))?
    };

    if spec.is_null() {
        return Err(SkillSchemaError::Parse(format!(
            "{}: empty skill file",
            path.display()
        )));
    }

    build_definition(spec, &path.display().to_string(), path.parent())
}

/// Load a skill definition from a JSON string (e.g. generated skills).
pub fn load_skill_from_json(text: &str, source: &str) -> Result<SkillDefinition, SkillSchemaError> {
    let spec: Value = serde_json::from_str(text)
        .map_err(|e| SkillSchemaError::Parse(format!("{}: {}", source, e)))?;
    build_definition(spec, source, None)
}

fn build_definition(
    spec: Value,
    source: &str,
    base_dir: Option<&Path>,
) -> Result<SkillDefinition, SkillSchemaError> {
    let mut normalized = validate_skill_spec(spec, source)?;

    if let Some(vocab_path) = normalized.get("vocab_path").and_then(Value::as_str) {
        let resolved = match base_dir {
            Some(dir) => dir.join(vocab_path),
            None => Path::new(vocab_path).to_path_buf(),
        };
        merge_vocab_file(&mut normalized, &resolved);
    }

    let skill_id = normalized["id"].as_str().unwrap_or_default().to_string();
    let name = normalized["name"].as_str().unwrap_or_default().to_string();
    let version = normalized["version"].as_str().unwrap_or_default().to_string();

    Ok(SkillDefinition {
        skill_id,
        name,
        version,
        source: source.to_string(),
        spec: normalized,
    })
}
