//! Execution trace structures for skill runs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::skills::errors::SkillError;

/// One attempt at one step: what was dispatched and how it ended.
#[derive(Debug, Clone)]
pub struct StepAttemptReport {
    pub attempt: u32,
    /// The concrete action that was dispatched, when one was built.
    pub action: Option<Value>,
    pub success: bool,
    pub error: Option<SkillError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// All attempts at one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step_id: String,
    pub attempts: Vec<StepAttemptReport>,
    pub success: bool,
}

impl StepReport {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            attempts: Vec::new(),
            success: false,
        }
    }
}

/// Append-only trace of one skill run; returned to the caller, never
/// mutated afterward.
#[derive(Debug, Clone)]
pub struct SkillRunReport {
    pub skill_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Resolved input variables the run started with.
    pub inputs: Map<String, Value>,
    pub steps: Vec<StepReport>,
}

impl SkillRunReport {
    pub fn new(skill_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            skill_id: skill_id.into(),
            started_at: now,
            ended_at: now,
            inputs,
            steps: Vec::new(),
        }
    }

    /// Total attempts across all steps.
    pub fn attempt_count(&self) -> usize {
        self.steps.iter().map(|step| step.attempts.len()).sum()
    }
}

/// Outcome of a skill run as returned to the caller.
#[derive(Debug, Clone)]
pub struct SkillRunResult {
    pub success: bool,
    pub message: String,
    pub error: Option<SkillError>,
    pub report: SkillRunReport,
}

impl SkillRunResult {
    pub fn succeeded(message: impl Into<String>, report: SkillRunReport) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            report,
        }
    }

    pub fn failed(error: SkillError, report: SkillRunReport) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            error: Some(error),
            report,
        }
    }
}
