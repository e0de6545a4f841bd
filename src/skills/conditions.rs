//! Tri-state condition evaluation over an observation.
//!
//! Conditions resolve to decided-true, decided-false, or unknown ("cannot be
//! decided from this observation"). Unknown is a first-class value, not a
//! disguised false: `all`/`any` treat it per the tables below.

use regex::RegexBuilder;
use serde_json::Value;

use crate::skills::observation::Observation;
use crate::skills::selector::find_nodes;
use crate::skills::utils::hamming_distance;

/// Three-valued condition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }

    pub fn is_unknown(self) -> bool {
        self == Truth::Unknown
    }

    fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }
}

/// Evaluate a condition spec against an observation.
///
/// `None`/missing spec counts as true (no constraint). A malformed spec or
/// an unrecognized leaf predicate evaluates to unknown rather than failing
/// the run.
pub fn evaluate_condition(spec: Option<&Value>, observation: &Observation) -> Truth {
    let Some(spec) = spec else { return Truth::True };
    if spec.is_null() {
        return Truth::True;
    }
    let Some(map) = spec.as_object() else {
        return Truth::Unknown;
    };

    // all: false dominates, then unknown, else true.
    if let Some(children) = map.get("all").and_then(Value::as_array) {
        let results: Vec<Truth> = children
            .iter()
            .map(|child| evaluate_condition(Some(child), observation))
            .collect();
        if results.iter().any(|r| r.is_false()) {
            return Truth::False;
        }
        if results.iter().any(|r| r.is_unknown()) {
            return Truth::Unknown;
        }
        return Truth::True;
    }

    // any: true dominates, all-false is false, else unknown.
    if let Some(children) = map.get("any").and_then(Value::as_array) {
        let results: Vec<Truth> = children
            .iter()
            .map(|child| evaluate_condition(Some(child), observation))
            .collect();
        if results.iter().any(|r| r.is_true()) {
            return Truth::True;
        }
        if !results.is_empty() && results.iter().all(|r| r.is_false()) {
            return Truth::False;
        }
        return Truth::Unknown;
    }

    if let Some(inner) = map.get("not") {
        return match evaluate_condition(Some(inner), observation) {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        };
    }

    if let Some(expected) = map.get("app_is") {
        return match expected {
            Value::String(name) => Truth::from_bool(observation.app_name == *name),
            Value::Array(names) => Truth::from_bool(
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|name| observation.app_name == name),
            ),
            _ => Truth::Unknown,
        };
    }

    if let Some(expected) = map.get("app_in") {
        return match expected {
            Value::Array(names) => Truth::from_bool(
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|name| observation.app_name == name),
            ),
            _ => Truth::False,
        };
    }

    const TEXT_KEYS: [&str; 6] = [
        "text_all",
        "text_any",
        "text_contains",
        "text_any_contains",
        "text_regex_all",
        "text_regex_any",
    ];
    if TEXT_KEYS.iter().any(|key| map.contains_key(*key)) {
        // Without any extracted text the screen is unreadable, not empty.
        if observation.ui_texts.is_empty() {
            return Truth::Unknown;
        }
        let texts: Vec<String> = observation
            .ui_texts
            .iter()
            .map(|t| normalize_text(t))
            .collect();

        if let Some(targets) = map.get("text_all").and_then(Value::as_array) {
            return Truth::from_bool(str_targets(targets).iter().all(|target| {
                texts.iter().any(|text| text == target)
            }));
        }
        if let Some(targets) = map.get("text_any").and_then(Value::as_array) {
            return Truth::from_bool(str_targets(targets).iter().any(|target| {
                texts.iter().any(|text| text == target)
            }));
        }
        if let Some(targets) = map.get("text_contains").and_then(Value::as_array) {
            return Truth::from_bool(str_targets(targets).iter().all(|target| {
                texts.iter().any(|text| text.contains(target.as_str()))
            }));
        }
        if let Some(targets) = map.get("text_any_contains").and_then(Value::as_array) {
            return Truth::from_bool(str_targets(targets).iter().any(|target| {
                texts.iter().any(|text| text.contains(target.as_str()))
            }));
        }
        if let Some(patterns) = map.get("text_regex_all").and_then(Value::as_array) {
            return Truth::from_bool(match_regex_list(&texts, patterns, true));
        }
        if let Some(patterns) = map.get("text_regex_any").and_then(Value::as_array) {
            return Truth::from_bool(match_regex_list(&texts, patterns, false));
        }
    }

    if let Some(selector) = map.get("selector") {
        if observation.ui_nodes.is_empty() {
            return Truth::Unknown;
        }
        return Truth::from_bool(!find_nodes(&observation.ui_nodes, selector).is_empty());
    }

    if let Some(expected) = map.get("screen_hash") {
        let Some(actual) = observation.screen_hash.as_deref() else {
            return Truth::Unknown;
        };
        let (expected_hash, max_distance) = match expected {
            Value::String(hash) => (hash.as_str(), 0u32),
            Value::Object(spec) => {
                let hash = spec.get("value").and_then(Value::as_str).unwrap_or("");
                let distance = spec.get("distance").and_then(Value::as_u64).unwrap_or(0) as u32;
                (hash, distance)
            }
            _ => return Truth::Unknown,
        };
        if expected_hash.is_empty() {
            return Truth::Unknown;
        }
        return match hamming_distance(actual, expected_hash) {
            Ok(distance) => Truth::from_bool(distance <= max_distance),
            Err(_) => Truth::Unknown,
        };
    }

    Truth::Unknown
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

fn str_targets(targets: &[Value]) -> Vec<String> {
    targets
        .iter()
        .filter_map(Value::as_str)
        .map(normalize_text)
        .collect()
}

/// Regex matching against the text list. An invalid pattern counts as a
/// non-match, not an error.
fn match_regex_list(texts: &[String], patterns: &[Value], require_all: bool) -> bool {
    let mut results = Vec::new();
    for pattern in patterns.iter().filter_map(Value::as_str) {
        let matched = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|re| texts.iter().any(|text| re.is_match(text)))
            .unwrap_or(false);
        results.push(matched);
    }
    if require_all {
        results.iter().all(|m| *m)
    } else {
        results.iter().any(|m| *m)
    }
}
