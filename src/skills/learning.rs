//! Case-pack capture for offline skill authoring.
//!
//! When a task resolves to nothing (or a shadow skill fires), the screen
//! evidence is bundled into a timestamped directory so new skills can be
//! written against real failures. Packs are write-only at runtime.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::skills::observation::Observation;
use crate::skills::utils::decode_image_from_base64;

const LEARNING_ENV: &str = "PHONE_PILOT_SKILL_LEARNING";
const CASES_DIR_ENV: &str = "PHONE_PILOT_SKILL_CASES_DIR";
const DEFAULT_CASES_DIR: &str = "skills/_cases";

#[derive(Error, Debug)]
pub enum LearningError {
    #[error("Failed to write case pack: {0}")]
    Write(#[from] std::io::Error),
    #[error("Failed to serialize case pack: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialized evidence bundle for one unresolved scenario.
#[derive(Debug, Serialize)]
pub struct CasePack {
    pub case_id: String,
    pub task: String,
    pub reason: String,
    pub timestamp: String,
    pub app_name: Option<String>,
    pub device_id: Option<String>,
    pub skill_id: Option<String>,
    pub step_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub screen_hash: Option<String>,
    pub ocr_texts: Vec<String>,
    pub ocr_nodes: Vec<Value>,
    pub extra: Map<String, Value>,
}

/// Extra context attached to a case beyond the observation.
#[derive(Debug, Default, Clone)]
pub struct CaseContext {
    pub skill_id: Option<String>,
    pub step_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub extra: Map<String, Value>,
}

/// Writes case packs under `<cases_dir>/<YYYYMMDD>/<case_id>/`.
pub struct SkillLearningRecorder {
    cases_dir: PathBuf,
}

impl SkillLearningRecorder {
    pub fn new(cases_dir: impl Into<PathBuf>) -> Self {
        Self {
            cases_dir: cases_dir.into(),
        }
    }

    /// Build a recorder from the environment, or `None` when learning
    /// capture is not enabled.
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var(LEARNING_ENV)
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if !enabled {
            return None;
        }
        let dir = std::env::var(CASES_DIR_ENV).unwrap_or_else(|_| DEFAULT_CASES_DIR.to_string());
        Some(Self::new(dir))
    }

    /// Persist one case; returns the case directory.
    pub fn record_case(
        &self,
        task: &str,
        reason: &str,
        observation: Option<&Observation>,
        context: CaseContext,
    ) -> Result<PathBuf, LearningError> {
        let now = Utc::now();
        let case_id = format!("case_{}", Uuid::new_v4().simple());
        let case_dir = self
            .cases_dir
            .join(now.format("%Y%m%d").to_string())
            .join(&case_id);
        std::fs::create_dir_all(&case_dir)?;

        let pack = CasePack {
            case_id,
            task: task.to_string(),
            reason: reason.to_string(),
            timestamp: now.to_rfc3339(),
            app_name: observation.map(|o| o.app_name.clone()),
            device_id: observation.and_then(|o| o.device_id.clone()),
            skill_id: context.skill_id,
            step_id: context.step_id,
            error_code: context.error_code,
            error_message: context.error_message,
            screen_hash: observation.and_then(|o| o.screen_hash.clone()),
            ocr_texts: observation.map(|o| o.ui_texts.clone()).unwrap_or_default(),
            ocr_nodes: observation
                .map(|o| {
                    o.ui_nodes
                        .iter()
                        .map(|node| {
                            serde_json::json!({
                                "text": node.text,
                                "bounds": [node.bounds.0, node.bounds.1, node.bounds.2, node.bounds.3],
                                "class_name": node.class_name,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            extra: context.extra,
        };

        std::fs::write(
            case_dir.join("case.json"),
            serde_json::to_string_pretty(&pack)?,
        )?;

        if let Some(observation) = observation {
            self.save_screenshot(observation, &case_dir);
        }

        tracing::info!("case pack written: {}", case_dir.display());
        Ok(case_dir)
    }

    /// Record a shadow-skill hit for offline review.
    pub fn record_shadow_match(
        &self,
        task: &str,
        observation: Option<&Observation>,
        skill_id: &str,
        reason: &str,
    ) -> Result<PathBuf, LearningError> {
        self.record_case(
            task,
            reason,
            observation,
            CaseContext {
                skill_id: Some(skill_id.to_string()),
                ..CaseContext::default()
            },
        )
    }

    fn save_screenshot(&self, observation: &Observation, case_dir: &Path) {
        if observation.screenshot.base64_data.is_empty() {
            return;
        }
        if let Some(image) = decode_image_from_base64(&observation.screenshot.base64_data) {
            if let Err(e) = image.save(case_dir.join("screenshot.png")) {
                tracing::warn!("failed to save case screenshot: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::testing::observation_with;

    #[test]
    fn test_record_case_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SkillLearningRecorder::new(dir.path());
        let observation = observation_with("Chrome", &["Sign in"], Vec::new(), Some("ff00"));

        let case_dir = recorder
            .record_case(
                "log into the site",
                "no_skill_match",
                Some(&observation),
                CaseContext::default(),
            )
            .unwrap();

        let raw = std::fs::read_to_string(case_dir.join("case.json")).unwrap();
        let pack: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(pack["task"], "log into the site");
        assert_eq!(pack["reason"], "no_skill_match");
        assert_eq!(pack["app_name"], "Chrome");
        assert_eq!(pack["ocr_texts"][0], "Sign in");
        assert_eq!(pack["screen_hash"], "ff00");
    }

    #[test]
    fn test_record_shadow_match_sets_skill() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SkillLearningRecorder::new(dir.path());
        let case_dir = recorder
            .record_shadow_match("share a photo", None, "auto_share_v2", "shadow-match")
            .unwrap();
        let raw = std::fs::read_to_string(case_dir.join("case.json")).unwrap();
        let pack: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(pack["skill_id"], "auto_share_v2");
        assert_eq!(pack["reason"], "shadow-match");
    }
}
