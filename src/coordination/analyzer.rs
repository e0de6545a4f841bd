//! Vision-model exception analysis for recovery planning.

use serde_json::{json, Value};

use crate::model::{extract_json_object, MessageBuilder, ModelClient, ModelConfig};
use crate::skills::Observation;

use super::types::ExceptionContext;

/// Parsed analyzer diagnosis.
#[derive(Debug, Clone)]
pub struct ExceptionAnalysis {
    pub exception_type: String,
    pub description: String,
    pub strategies: Vec<String>,
    pub recommended_action: String,
    pub suggested_skill: Option<String>,
    pub confidence: f64,
    pub raw: String,
}

/// Sends a screenshot plus structured error context to the vision model and
/// parses its JSON diagnosis.
pub struct VisionExceptionAnalyzer {
    client: ModelClient,
}

impl VisionExceptionAnalyzer {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: ModelClient::new(config),
        }
    }

    /// Analyze a failure. Returns `None` when the screenshot is missing or
    /// the model's answer cannot be parsed; recovery then falls back to the
    /// static error map.
    pub async fn analyze(
        &self,
        observation: &Observation,
        context: &ExceptionContext,
        recovery_skills: &[String],
    ) -> Option<ExceptionAnalysis> {
        if observation.screenshot.base64_data.is_empty() {
            return None;
        }

        let system_prompt = "You are an expert mobile UI exception analyst. \
            Given a screenshot, error details, and recovery skill options, \
            diagnose the issue and recommend a recovery skill. Return only JSON.";

        let payload = json!({
            "error_code": context.error_code,
            "error_message": context.message,
            "step_id": context.step_id,
            "attempt": context.attempt,
        });
        let user_prompt = format!(
            "Analyze the current UI state and error context.\n\
             Error: {}\n\
             Recovery skill options: {}\n\n\
             Return JSON with fields: exception_type, description, strategies (array), \
             recommended_action, suggested_skill, confidence (0-1).",
            payload,
            serde_json::to_string(recovery_skills).unwrap_or_default(),
        );

        let messages = vec![
            MessageBuilder::create_system_message(system_prompt),
            MessageBuilder::create_user_message(
                &user_prompt,
                Some(&observation.screenshot.base64_data),
            ),
        ];

        let content = match self.client.request(&messages).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("exception analysis request failed: {}", e);
                return None;
            }
        };

        let data = extract_json_object(&content)?;
        Some(parse_analysis(&data, content))
    }
}

fn parse_analysis(data: &Value, raw: String) -> ExceptionAnalysis {
    ExceptionAnalysis {
        exception_type: data
            .get("exception_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        description: data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        strategies: data
            .get("strategies")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        recommended_action: data
            .get("recommended_action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        suggested_skill: data
            .get("suggested_skill")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        confidence: data.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analysis_full() {
        let data = json!({
            "exception_type": "popup",
            "description": "A permission dialog covers the target",
            "strategies": ["dismiss the dialog"],
            "recommended_action": "run recovery skill",
            "suggested_skill": "close_popup",
            "confidence": 0.82,
        });
        let analysis = parse_analysis(&data, "raw".to_string());
        assert_eq!(analysis.suggested_skill.as_deref(), Some("close_popup"));
        assert!((analysis.confidence - 0.82).abs() < 1e-9);
        assert_eq!(analysis.strategies.len(), 1);
    }

    #[test]
    fn test_parse_analysis_defaults() {
        let analysis = parse_analysis(&json!({}), String::new());
        assert_eq!(analysis.exception_type, "unknown");
        assert!(analysis.suggested_skill.is_none());
        assert_eq!(analysis.confidence, 0.0);
    }
}
