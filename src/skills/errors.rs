//! Skill error codes and the structured error carried through a run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Closed taxonomy of skill failure codes.
///
/// Every failure a run can surface maps to exactly one of these; handlers
/// filter on them and the recovery layer maps them to recovery skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillErrorCode {
    PreconditionFailed,
    PreconditionUnknown,
    ScreenMismatch,
    TargetNotFound,
    ActionFailed,
    ActionException,
    PostconditionFailed,
    Timeout,
    DeviceError,
    ErrorScreenDetected,
    HandlerFailed,
    Aborted,
    Unknown,
}

impl SkillErrorCode {
    /// Wire name of the code, as used in skill files and handler filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillErrorCode::PreconditionFailed => "PRECONDITION_FAILED",
            SkillErrorCode::PreconditionUnknown => "PRECONDITION_UNKNOWN",
            SkillErrorCode::ScreenMismatch => "SCREEN_MISMATCH",
            SkillErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            SkillErrorCode::ActionFailed => "ACTION_FAILED",
            SkillErrorCode::ActionException => "ACTION_EXCEPTION",
            SkillErrorCode::PostconditionFailed => "POSTCONDITION_FAILED",
            SkillErrorCode::Timeout => "TIMEOUT",
            SkillErrorCode::DeviceError => "DEVICE_ERROR",
            SkillErrorCode::ErrorScreenDetected => "ERROR_SCREEN_DETECTED",
            SkillErrorCode::HandlerFailed => "HANDLER_FAILED",
            SkillErrorCode::Aborted => "ABORTED",
            SkillErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SkillErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured skill failure.
///
/// This is a result payload, not a thrown error: the runner returns it inside
/// `SkillRunResult` and never panics across the public `run` boundary.
/// Instances are immutable; `with_details` returns an updated copy.
#[derive(Debug, Clone)]
pub struct SkillError {
    pub code: SkillErrorCode,
    pub message: String,
    /// Pipeline stage that produced the error (e.g. "guard", "action").
    pub stage: String,
    pub step_id: Option<String>,
    pub error_id: Option<String>,
    pub attempt: Option<u32>,
    pub details: Map<String, Value>,
    /// Set when the failure needs a human (login wall, captcha); the run
    /// must stop unconditionally.
    pub requires_takeover: bool,
}

impl SkillError {
    pub fn new(code: SkillErrorCode, message: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stage: stage.into(),
            step_id: None,
            error_id: None,
            attempt: None,
            details: Map::new(),
            requires_takeover: false,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error_id(mut self, error_id: impl Into<String>) -> Self {
        self.error_id = Some(error_id.into());
        self
    }

    /// Return a copy with the given detail fields merged over the existing
    /// ones. The original is left untouched so concurrent handler logic can
    /// never observe a half-updated error.
    pub fn with_details(&self, extra: Map<String, Value>) -> Self {
        let mut merged = self.details.clone();
        for (key, value) in extra {
            merged.insert(key, value);
        }
        Self {
            details: merged,
            ..self.clone()
        }
    }

    pub fn requiring_takeover(mut self) -> Self {
        self.requires_takeover = true;
        self
    }

    /// Flatten into a JSON object for reports, case packs and the analyzer.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "code": self.code.as_str(),
            "message": self.message,
            "stage": self.stage,
            "step_id": self.step_id,
            "error_id": self.error_id,
            "attempt": self.attempt,
            "details": Value::Object(self.details.clone()),
            "requires_takeover": self.requires_takeover,
        })
    }
}

impl fmt::Display for SkillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (stage: {})", self.code, self.message, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_round_trip() {
        let code: SkillErrorCode = serde_json::from_str("\"TARGET_NOT_FOUND\"").unwrap();
        assert_eq!(code, SkillErrorCode::TargetNotFound);
        assert_eq!(code.as_str(), "TARGET_NOT_FOUND");
    }

    #[test]
    fn test_with_details_merges_without_mutating() {
        let error = SkillError::new(SkillErrorCode::ActionFailed, "tap failed", "action")
            .with_step("step_2")
            .with_attempt(1);

        let mut extra = Map::new();
        extra.insert("takeover_message".to_string(), json!("please log in"));
        let updated = error.with_details(extra);

        assert!(error.details.is_empty());
        assert_eq!(updated.details["takeover_message"], "please log in");
        assert_eq!(updated.step_id.as_deref(), Some("step_2"));
        assert_eq!(updated.attempt, Some(1));
    }

    #[test]
    fn test_display() {
        let error = SkillError::new(SkillErrorCode::ScreenMismatch, "guard failed", "guard");
        assert_eq!(error.to_string(), "[SCREEN_MISMATCH] guard failed (stage: guard)");
    }
}
