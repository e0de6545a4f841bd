//! Declarative skill engine: definitions, routing, and execution.

mod common_handlers;
mod conditions;
mod errors;
mod learning;
mod loader;
mod observation;
mod ocr;
mod registry;
mod reporting;
mod router;
mod runner;
mod schema;
mod selector;
mod utils;
mod vocab;

#[cfg(test)]
pub mod testing;

pub use common_handlers::load_common_handlers;
pub use conditions::{evaluate_condition, Truth};
pub use errors::{SkillError, SkillErrorCode};
pub use learning::{CaseContext, CasePack, LearningError, SkillLearningRecorder};
pub use loader::{load_skill_file, load_skill_from_json};
pub use observation::{
    LiveObservationProvider, Observation, ObservationError, ObservationSource,
    PlaybackObservationProvider, RecordingObservationProvider,
};
pub use ocr::{build_ocr_provider, NullOcr, OcrError, OcrProvider, OcrResult, TesseractOcr, VisionOcr};
pub use registry::SkillRegistry;
pub use reporting::{SkillRunReport, SkillRunResult, StepAttemptReport, StepReport};
pub use router::{RouteAction, RoutingDecision, SkillDirective, SkillRouter, SkillRouterConfig};
pub use runner::{RetryPolicy, SkillRunner, SkillRunnerConfig};
pub use schema::{validate_skill_spec, SkillDefinition, SkillSchemaError};
pub use selector::{
    extract_texts, find_nodes, node_matches_selector, parse_ui_dump, pick_best_node,
    resolve_selector_to_point, UINode,
};
pub use utils::{compute_ahash, hamming_distance, render_string, render_templates};
pub use vocab::expand_vocab_refs;
