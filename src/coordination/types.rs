//! Plan and intent types shared by the coordination tier.

use serde_json::{Map, Value};

use crate::skills::SkillError;

/// What kind of work a plan step carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStepKind {
    Skill,
    Intent,
    Llm,
}

/// A single atomic intent for the fast tier (tap/swipe/type/wait/back/home).
#[derive(Debug, Clone)]
pub struct Intent {
    pub name: String,
    pub params: Map<String, Value>,
}

impl Intent {
    pub fn new(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// One step of a plan: either a skill invocation or an intent.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_id: String,
    pub kind: PlanStepKind,
    pub skill_id: Option<String>,
    pub inputs: Map<String, Value>,
    pub intent: Option<Intent>,
    pub description: String,
}

impl PlanStep {
    pub fn skill(step_id: impl Into<String>, skill_id: impl Into<String>, inputs: Map<String, Value>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            kind: PlanStepKind::Skill,
            skill_id: Some(skill_id.into()),
            inputs,
            intent: None,
            description: description.into(),
        }
    }

    pub fn intent(step_id: impl Into<String>, intent: Intent) -> Self {
        Self {
            step_id: step_id.into(),
            kind: PlanStepKind::Intent,
            skill_id: None,
            inputs: Map::new(),
            intent: Some(intent),
            description: String::new(),
        }
    }
}

/// An ordered list of steps for one task, produced fresh by the planner and
/// consumed once by the coordinator.
#[derive(Debug, Clone)]
pub struct Plan {
    pub task: String,
    pub steps: Vec<PlanStep>,
    pub reason: String,
    pub blocked: bool,
    pub blocked_reason: String,
}

impl Plan {
    pub fn new(task: impl Into<String>, steps: Vec<PlanStep>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps,
            reason: reason.into(),
            blocked: false,
            blocked_reason: String::new(),
        }
    }

    pub fn blocked(task: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            task: task.into(),
            steps: Vec::new(),
            reason: reason.clone(),
            blocked: true,
            blocked_reason: reason,
        }
    }
}

/// Structured error context handed to the exception analyzer.
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    pub message: String,
    pub error_code: Option<String>,
    pub step_id: Option<String>,
    pub attempt: Option<u32>,
    pub details: Value,
}

impl ExceptionContext {
    pub fn from_error(error: &SkillError) -> Self {
        Self {
            message: error.message.clone(),
            error_code: Some(error.code.as_str().to_string()),
            step_id: error.step_id.clone(),
            attempt: error.attempt,
            details: error.to_value(),
        }
    }
}
