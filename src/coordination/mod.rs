//! Dual-tier coordination: fast reactive intents, slow planning, recovery.

mod agent;
mod analyzer;
mod config;
mod coordinator;
mod system1;
mod system2;
mod types;

pub use agent::{PilotAgent, PilotConfig};
pub use analyzer::{ExceptionAnalysis, VisionExceptionAnalyzer};
pub use config::{CoordinationConfig, SkillLayerConfig, System1Config, System2Config};
pub use coordinator::Coordinator;
pub use system1::FastActionSystem;
pub use system2::{RecoveryDecision, SlowPlannerSystem};
pub use types::{ExceptionContext, Intent, Plan, PlanStep, PlanStepKind};
