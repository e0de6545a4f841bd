//! Shared vocabulary files and macro expansion for routing lists.

use serde_json::{Map, Value};
use std::path::Path;

/// Merge a vocabulary file into a skill spec's `vocab` map.
///
/// The file is a YAML mapping of `name -> [strings]`. Entries already
/// declared inline in the spec win over the file's. Unreadable or malformed
/// files are ignored; routing then simply sees fewer expansions.
pub fn merge_vocab_file(spec: &mut Map<String, Value>, path: &Path) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("vocab file {} unreadable: {}", path.display(), e);
            return;
        }
    };
    let loaded: Value = match serde_yaml::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("vocab file {} malformed: {}", path.display(), e);
            return;
        }
    };
    let Value::Object(loaded) = loaded else {
        tracing::warn!("vocab file {} is not a mapping", path.display());
        return;
    };

    let vocab = spec
        .entry("vocab")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(vocab) = vocab {
        for (key, value) in loaded {
            vocab.entry(key).or_insert(value);
        }
    }
}

/// Expand `$name` references in a keyword/regex list against a vocabulary.
///
/// An entry that is exactly `$name` is replaced by the named vocabulary
/// list's string entries; anything unresolvable stays literal so routing
/// remains deterministic with or without the vocabulary present.
pub fn expand_vocab_refs(entries: &[Value], vocab: Option<&Map<String, Value>>) -> Vec<String> {
    let mut expanded = Vec::new();
    for entry in entries {
        let Some(text) = entry.as_str() else { continue };
        if let Some(name) = text.strip_prefix('$') {
            if let Some(list) = vocab
                .and_then(|v| v.get(name))
                .and_then(Value::as_array)
            {
                expanded.extend(
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(|s| s.to_string()),
                );
                continue;
            }
        }
        expanded.push(text.to_string());
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vocab() -> Map<String, Value> {
        json!({"publish_words": ["post", "upload"], "empty": []})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_expand_replaces_reference() {
        let entries = vec![json!("share"), json!("$publish_words")];
        let expanded = expand_vocab_refs(&entries, Some(&vocab()));
        assert_eq!(expanded, vec!["share", "post", "upload"]);
    }

    #[test]
    fn test_unresolved_reference_stays_literal() {
        let entries = vec![json!("$missing")];
        let expanded = expand_vocab_refs(&entries, Some(&vocab()));
        assert_eq!(expanded, vec!["$missing"]);
    }

    #[test]
    fn test_expand_without_vocab() {
        let entries = vec![json!("$publish_words"), json!("send")];
        let expanded = expand_vocab_refs(&entries, None);
        assert_eq!(expanded, vec!["$publish_words", "send"]);
    }

    #[test]
    fn test_merge_vocab_file_inline_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.yml");
        std::fs::write(&path, "greetings: [hello]\nfarewells: [bye]\n").unwrap();

        let mut spec = json!({"vocab": {"greetings": ["hi"]}})
            .as_object()
            .unwrap()
            .clone();
        merge_vocab_file(&mut spec, &path);

        let vocab = spec["vocab"].as_object().unwrap();
        assert_eq!(vocab["greetings"][0], "hi");
        assert_eq!(vocab["farewells"][0], "bye");
    }
}
