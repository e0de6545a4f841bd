//! Skill execution: the per-step state machine with guards, retries and the
//! error-handler escalation pipeline.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::actions::ActionHandler;
use crate::skills::common_handlers::load_common_handlers;
use crate::skills::conditions::{evaluate_condition, Truth};
use crate::skills::errors::{SkillError, SkillErrorCode};
use crate::skills::observation::{Observation, ObservationSource};
use crate::skills::registry::SkillRegistry;
use crate::skills::reporting::{SkillRunReport, SkillRunResult, StepAttemptReport, StepReport};
use crate::skills::selector::resolve_selector_to_point;
use crate::skills::utils::{backoff_delay_ms, render_templates};

/// Retry behavior for a step, merged from the runner default and any
/// step-local or handler override.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    /// When set, only these error codes are retryable.
    pub on_codes: Option<Vec<String>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
            jitter_ms: 0,
            on_codes: None,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from a spec fragment, falling back field-by-field.
    pub fn from_value(spec: Option<&Value>, fallback: &RetryPolicy) -> Self {
        let Some(spec) = spec.and_then(Value::as_object) else {
            return fallback.clone();
        };
        let u64_field = |key: &str, fallback: u64| {
            spec.get(key).and_then(Value::as_u64).unwrap_or(fallback)
        };
        Self {
            max_attempts: u64_field("max_attempts", fallback.max_attempts as u64) as u32,
            backoff_ms: u64_field("backoff_ms", fallback.backoff_ms),
            backoff_multiplier: spec
                .get("backoff_multiplier")
                .and_then(Value::as_f64)
                .unwrap_or(fallback.backoff_multiplier),
            max_backoff_ms: u64_field("max_backoff_ms", fallback.max_backoff_ms),
            jitter_ms: u64_field("jitter_ms", fallback.jitter_ms),
            on_codes: spec
                .get("on_codes")
                .and_then(Value::as_array)
                .map(|codes| {
                    codes
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| s.to_string())
                        .collect()
                })
                .or_else(|| fallback.on_codes.clone()),
        }
    }

    fn allows(&self, code: SkillErrorCode, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match &self.on_codes {
            Some(codes) => codes.iter().any(|c| c == code.as_str()),
            None => true,
        }
    }
}

/// Runner policy knobs.
#[derive(Debug, Clone)]
pub struct SkillRunnerConfig {
    /// Treat an undecidable precondition/guard as failure.
    pub strict_preconditions: bool,
    /// Treat an undecidable assert/postcondition as failure.
    pub strict_postconditions: bool,
    pub default_retry: RetryPolicy,
    /// Bound on before-step handler absorption loops per attempt.
    pub max_handler_cycles: u32,
    /// Build and check everything but dispatch nothing to the device.
    pub dry_run: bool,
    pub common_error_handlers_path: Option<PathBuf>,
    pub common_error_handlers: Vec<Value>,
    /// Seed for backoff jitter; None draws from entropy.
    pub random_seed: Option<u64>,
}

impl Default for SkillRunnerConfig {
    fn default() -> Self {
        Self {
            strict_preconditions: true,
            strict_postconditions: true,
            default_retry: RetryPolicy::default(),
            max_handler_cycles: 3,
            dry_run: false,
            common_error_handlers_path: None,
            common_error_handlers: Vec::new(),
            random_seed: None,
        }
    }
}

/// Handler verdicts, in spec vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Retry,
    Continue,
    Abort,
    Escalate,
}

impl Resolution {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("continue") => Resolution::Continue,
            Some("abort") => Resolution::Abort,
            Some("escalate") => Resolution::Escalate,
            _ => Resolution::Retry,
        }
    }
}

struct HandlerOutcome {
    resolution: Resolution,
    retry_policy: Option<RetryPolicy>,
    error: SkillError,
}

/// What the step loop should do after a failure was routed through the
/// handler pipeline.
enum FailureNext {
    /// Treat the step as succeeded and move on.
    StepDone,
    /// Fail the whole run with this error.
    Abort(SkillError),
    /// Back off and re-attempt the step. Carries the effective attempt cap,
    /// so a handler-supplied retry policy can extend the step's own.
    Retry(u32),
}

/// Executes skills against an observation source and a device handle.
pub struct SkillRunner {
    registry: Arc<SkillRegistry>,
    config: SkillRunnerConfig,
    action_handler: ActionHandler,
    observer: Box<dyn ObservationSource>,
    rng: StdRng,
}

impl SkillRunner {
    pub fn new(
        registry: Arc<SkillRegistry>,
        config: SkillRunnerConfig,
        action_handler: ActionHandler,
        observer: Box<dyn ObservationSource>,
    ) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry,
            config,
            action_handler,
            observer,
            rng,
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    /// Capture a fresh observation through the runner's own source, so the
    /// coordinator and the runner see the same recording/playback stream.
    pub async fn capture_observation(&mut self) -> Option<Observation> {
        match self.observer.capture().await {
            Ok(observation) => Some(observation),
            Err(e) => {
                tracing::warn!("observation capture failed: {}", e);
                None
            }
        }
    }

    /// Run a skill to completion. Never panics across this boundary: every
    /// failure comes back as a structured result.
    pub async fn run(&mut self, skill_id: &str, inputs: Map<String, Value>) -> SkillRunResult {
        let Some(skill) = self.registry.get(skill_id) else {
            let error = SkillError::new(
                SkillErrorCode::Unknown,
                format!("Skill not found: {}", skill_id),
                "load",
            );
            return SkillRunResult::failed(error, SkillRunReport::new(skill_id, inputs));
        };
        let raw_spec = skill.spec.clone();

        let variables = match prepare_variables(&raw_spec, &inputs) {
            Ok(variables) => variables,
            Err(message) => {
                let error = SkillError::new(SkillErrorCode::PreconditionFailed, message, "inputs");
                return SkillRunResult::failed(error, SkillRunReport::new(skill_id, inputs));
            }
        };

        let mut spec = match render_templates(&Value::Object(raw_spec), &variables) {
            Value::Object(map) => map,
            _ => unreachable!("rendering preserves the spec shape"),
        };
        self.merge_common_handlers(&mut spec, &variables);

        let mut report = SkillRunReport::new(skill_id, variables);
        tracing::info!("running skill '{}'", skill_id);

        let mut observation = match self.observer.capture().await {
            Ok(observation) => observation,
            Err(e) => {
                let error =
                    SkillError::new(SkillErrorCode::DeviceError, e.to_string(), "observe");
                report.ended_at = Utc::now();
                return SkillRunResult::failed(error, report);
            }
        };

        // Preconditions. Handlers may run recovery actions or replace the
        // error, but a failed precondition always ends the run.
        let (pre_result, obs) = self
            .check_condition_block(
                spec.get("preconditions"),
                observation,
                self.config.strict_preconditions,
            )
            .await;
        observation = obs;
        if !pre_result.is_true() {
            let error = SkillError::new(
                if pre_result.is_false() {
                    SkillErrorCode::PreconditionFailed
                } else {
                    SkillErrorCode::PreconditionUnknown
                },
                "Preconditions not satisfied",
                "preconditions",
            );
            let outcome = self.handle_error(error, None, &spec, &observation).await;
            report.ended_at = Utc::now();
            return SkillRunResult::failed(outcome.error, report);
        }

        let steps = spec
            .get("steps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for step in &steps {
            let step_id = step
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let mut step_report = StepReport::new(&step_id);
            let (success, obs, error) = self
                .run_step(step, &spec, observation, &mut step_report)
                .await;
            observation = obs;
            step_report.success = success;
            report.steps.push(step_report);
            if !success {
                report.ended_at = Utc::now();
                let error = error.unwrap_or_else(|| {
                    SkillError::new(SkillErrorCode::Unknown, "Step failed", "step")
                        .with_step(&step_id)
                });
                return SkillRunResult::failed(error, report);
            }
        }

        let (post_result, observation) = self
            .check_condition_block(
                spec.get("postconditions"),
                observation,
                self.config.strict_postconditions,
            )
            .await;
        if !post_result.is_true() {
            let error = SkillError::new(
                SkillErrorCode::PostconditionFailed,
                "Postconditions not satisfied",
                "postconditions",
            );
            let outcome = self.handle_error(error, None, &spec, &observation).await;
            report.ended_at = Utc::now();
            if outcome.resolution == Resolution::Continue {
                return SkillRunResult::succeeded("Skill completed", report);
            }
            return SkillRunResult::failed(outcome.error, report);
        }

        report.ended_at = Utc::now();
        SkillRunResult::succeeded("Skill completed", report)
    }

    fn merge_common_handlers(&self, spec: &mut Map<String, Value>, variables: &Map<String, Value>) {
        let mut handlers: Vec<Value> = Vec::new();
        if let Some(path) = &self.config.common_error_handlers_path {
            handlers.extend(load_common_handlers(path));
        }
        handlers.extend(self.config.common_error_handlers.iter().cloned());
        if handlers.is_empty() {
            return;
        }
        // Skill-local handlers stay ahead of the shared ones in the scan
        // order, so a skill can always override the common policy.
        let mut merged: Vec<Value> = spec
            .get("error_handlers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        merged.extend(handlers.iter().map(|handler| render_templates(handler, variables)));
        spec.insert("error_handlers".to_string(), Value::Array(merged));
    }

    /// Execute one step, retrying per its policy. Returns (success, latest
    /// observation, error-if-failed).
    async fn run_step(
        &mut self,
        step: &Value,
        spec: &Map<String, Value>,
        mut observation: Observation,
        step_report: &mut StepReport,
    ) -> (bool, Observation, Option<SkillError>) {
        let step_id = step.get("id").and_then(Value::as_str).unwrap_or("unknown");
        let retry_policy = RetryPolicy::from_value(step.get("retry"), &self.config.default_retry);
        let mut max_attempts = retry_policy.max_attempts.max(1);

        let mut attempt = 0;
        while attempt < max_attempts {
            attempt += 1;
            let attempt_start = Utc::now();

            // Every attempt decides from fresh state.
            observation = match self.observer.capture().await {
                Ok(obs) => obs,
                Err(e) => {
                    let error = SkillError::new(
                        SkillErrorCode::DeviceError,
                        e.to_string(),
                        "observe",
                    )
                    .with_step(step_id)
                    .with_attempt(attempt);
                    match self
                        .resolve_failure(
                            error,
                            Some(step),
                            spec,
                            &observation,
                            &retry_policy,
                            attempt,
                            None,
                            attempt_start,
                            step_report,
                        )
                        .await
                    {
                        FailureNext::StepDone => return (true, observation, None),
                        FailureNext::Abort(error) => return (false, observation, Some(error)),
                        FailureNext::Retry(cap) => {
                            max_attempts = max_attempts.max(cap);
                            continue;
                        }
                    }
                }
            };

            // Absorb transient overlays (permission dialogs etc.) before the
            // step's own guard looks at the screen.
            observation = self.apply_before_step_handlers(step, spec, observation).await;

            let (guard_result, obs) = self
                .check_condition_block(
                    step.get("guard"),
                    observation,
                    self.config.strict_preconditions,
                )
                .await;
            observation = obs;
            if !guard_result.is_true() {
                let error = if guard_result.is_false() {
                    SkillError::new(SkillErrorCode::ScreenMismatch, "Step guard failed", "guard")
                } else {
                    SkillError::new(
                        SkillErrorCode::PreconditionUnknown,
                        "Step guard unknown",
                        "guard",
                    )
                }
                .with_step(step_id)
                .with_attempt(attempt);
                match self
                    .resolve_failure(
                        error,
                        Some(step),
                        spec,
                        &observation,
                        &retry_policy,
                        attempt,
                        None,
                        attempt_start,
                        step_report,
                    )
                    .await
                {
                    FailureNext::StepDone => return (true, observation, None),
                    FailureNext::Abort(error) => return (false, observation, Some(error)),
                    FailureNext::Retry(cap) => {
                        max_attempts = max_attempts.max(cap);
                        continue;
                    }
                }
            }

            if let Some(wait_ms) = wait_field(step, "before_ms") {
                sleep(Duration::from_millis(wait_ms)).await;
            }

            let action = match self.build_action(step, &observation) {
                Ok(action) => action,
                Err(error) => {
                    let error = error.with_attempt(attempt);
                    match self
                        .resolve_failure(
                            error,
                            Some(step),
                            spec,
                            &observation,
                            &retry_policy,
                            attempt,
                            None,
                            attempt_start,
                            step_report,
                        )
                        .await
                    {
                        FailureNext::StepDone => return (true, observation, None),
                        FailureNext::Abort(error) => return (false, observation, Some(error)),
                        FailureNext::Retry(cap) => {
                            max_attempts = max_attempts.max(cap);
                            continue;
                        }
                    }
                }
            };

            if let Some(error) = self.dispatch(&action, step_id, attempt) {
                match self
                    .resolve_failure(
                        error,
                        Some(step),
                        spec,
                        &observation,
                        &retry_policy,
                        attempt,
                        Some(action.clone()),
                        attempt_start,
                        step_report,
                    )
                    .await
                {
                    FailureNext::StepDone => return (true, observation, None),
                    FailureNext::Abort(error) => return (false, observation, Some(error)),
                    FailureNext::Retry(cap) => {
                        max_attempts = max_attempts.max(cap);
                        continue;
                    }
                }
            }

            if let Some(wait_ms) = wait_field(step, "after_ms") {
                sleep(Duration::from_millis(wait_ms)).await;
            }

            observation = match self.observer.capture().await {
                Ok(obs) => obs,
                Err(e) => {
                    tracing::warn!("post-action capture failed: {}", e);
                    observation
                }
            };
            let (assert_result, obs) = self
                .check_condition_block(
                    step.get("assert"),
                    observation,
                    self.config.strict_postconditions,
                )
                .await;
            observation = obs;
            if !assert_result.is_true() {
                let message = if assert_result.is_false() {
                    "Step assertion failed"
                } else {
                    "Step assertion unknown"
                };
                let error =
                    SkillError::new(SkillErrorCode::PostconditionFailed, message, "assert")
                        .with_step(step_id)
                        .with_attempt(attempt);
                match self
                    .resolve_failure(
                        error,
                        Some(step),
                        spec,
                        &observation,
                        &retry_policy,
                        attempt,
                        Some(action.clone()),
                        attempt_start,
                        step_report,
                    )
                    .await
                {
                    FailureNext::StepDone => return (true, observation, None),
                    FailureNext::Abort(error) => return (false, observation, Some(error)),
                    FailureNext::Retry(cap) => {
                        max_attempts = max_attempts.max(cap);
                        continue;
                    }
                }
            }

            step_report.attempts.push(StepAttemptReport {
                attempt,
                action: Some(action),
                success: true,
                error: None,
                started_at: attempt_start,
                ended_at: Utc::now(),
            });
            return (true, observation, None);
        }

        let error = SkillError::new(
            SkillErrorCode::Aborted,
            "Step retries exhausted",
            "retry",
        )
        .with_step(step_id);
        (false, observation, Some(error))
    }

    /// Dispatch an action unless dry-running. Returns the failure, if any.
    fn dispatch(&mut self, action: &Value, step_id: &str, attempt: u32) -> Option<SkillError> {
        if self.config.dry_run {
            return None;
        }
        match self.action_handler.execute(action) {
            Ok(result) if result.success => None,
            Ok(result) => Some(
                SkillError::new(
                    SkillErrorCode::ActionFailed,
                    result.message.unwrap_or_else(|| "Action failed".to_string()),
                    "action",
                )
                .with_step(step_id)
                .with_attempt(attempt),
            ),
            Err(e) => Some(
                SkillError::new(SkillErrorCode::ActionException, e.to_string(), "action")
                    .with_step(step_id)
                    .with_attempt(attempt),
            ),
        }
    }

    /// The single failure funnel: route the error through the handler
    /// pipeline, record the attempt, and translate the verdict into what the
    /// step loop should do next.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_failure(
        &mut self,
        error: SkillError,
        step: Option<&Value>,
        spec: &Map<String, Value>,
        observation: &Observation,
        base_policy: &RetryPolicy,
        attempt: u32,
        action: Option<Value>,
        attempt_start: chrono::DateTime<Utc>,
        step_report: &mut StepReport,
    ) -> FailureNext {
        let code = error.code;
        let outcome = self.handle_error(error, step, spec, observation).await;

        step_report.attempts.push(StepAttemptReport {
            attempt,
            action,
            success: false,
            error: Some(outcome.error.clone()),
            started_at: attempt_start,
            ended_at: Utc::now(),
        });

        match outcome.resolution {
            Resolution::Continue => FailureNext::StepDone,
            Resolution::Abort | Resolution::Escalate => FailureNext::Abort(outcome.error),
            Resolution::Retry => {
                let policy = outcome.retry_policy.as_ref().unwrap_or(base_policy);
                if !policy.allows(code, attempt) {
                    return FailureNext::Abort(outcome.error);
                }
                self.backoff(attempt, policy).await;
                FailureNext::Retry(policy.max_attempts)
            }
        }
    }

    /// Select and apply the first matching error handler.
    async fn handle_error(
        &mut self,
        error: SkillError,
        step: Option<&Value>,
        spec: &Map<String, Value>,
        observation: &Observation,
    ) -> HandlerOutcome {
        let handler = self.find_error_handler(&error, step, spec, observation);
        let Some(handler) = handler else {
            let optional = step
                .and_then(|s| s.get("optional"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if optional {
                tracing::debug!("no handler for optional step, continuing: {}", error);
                return HandlerOutcome {
                    resolution: Resolution::Continue,
                    retry_policy: None,
                    error,
                };
            }
            return HandlerOutcome {
                resolution: Resolution::Retry,
                retry_policy: None,
                error,
            };
        };

        let retry_policy = handler
            .get("retry")
            .map(|spec| RetryPolicy::from_value(Some(spec), &self.config.default_retry));

        if !self.execute_handler_actions(&handler, observation) {
            let handler_error = SkillError::new(
                SkillErrorCode::HandlerFailed,
                "Error handler failed",
                "handler",
            )
            .with_step(error.step_id.clone().unwrap_or_default())
            .with_attempt(error.attempt.unwrap_or(0));
            return HandlerOutcome {
                resolution: Resolution::Abort,
                retry_policy: None,
                error: handler_error,
            };
        }

        let resolution = Resolution::parse(handler.get("resolution").and_then(Value::as_str));
        if resolution == Resolution::Escalate {
            let takeover_message = handler
                .get("takeover_message")
                .and_then(Value::as_str)
                .unwrap_or("User intervention required")
                .to_string();
            if !self.config.dry_run {
                let action = json!({
                    "_metadata": "do",
                    "action": "Take_over",
                    "message": takeover_message,
                });
                if let Err(e) = self.action_handler.execute(&action) {
                    tracing::warn!("takeover dispatch failed: {}", e);
                }
            }
            let mut details = Map::new();
            details.insert("takeover_message".to_string(), Value::String(takeover_message));
            let error = error.with_details(details).requiring_takeover();
            return HandlerOutcome {
                resolution,
                retry_policy,
                error,
            };
        }

        HandlerOutcome {
            resolution,
            retry_policy,
            error,
        }
    }

    /// First matching `on_error` handler, scanning step-local handlers
    /// before skill-wide ones.
    fn find_error_handler(
        &self,
        error: &SkillError,
        step: Option<&Value>,
        spec: &Map<String, Value>,
        observation: &Observation,
    ) -> Option<Value> {
        let mut handlers: Vec<&Value> = Vec::new();
        if let Some(list) = step.and_then(|s| s.get("on_error")).and_then(Value::as_array) {
            handlers.extend(list.iter().filter(|h| handler_trigger(h) == "on_error"));
        }
        if let Some(list) = spec.get("error_handlers").and_then(Value::as_array) {
            handlers.extend(list.iter().filter(|h| handler_trigger(h) == "on_error"));
        }

        for handler in handlers {
            if let Some(codes) = handler.get("codes").and_then(Value::as_array) {
                let matched = codes
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|code| code == error.code.as_str());
                if !matched {
                    continue;
                }
            }
            if let Some(ids) = handler.get("error_ids").and_then(Value::as_array) {
                let matched = ids
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|id| Some(id) == error.error_id.as_deref());
                if !matched {
                    continue;
                }
            }
            if let Some(condition) = handler.get("when") {
                if !evaluate_condition(Some(condition), observation).is_true() {
                    continue;
                }
            }
            return Some(handler.clone());
        }
        None
    }

    /// Run a handler's recovery actions; false when any of them fails.
    fn execute_handler_actions(&mut self, handler: &Value, observation: &Observation) -> bool {
        let Some(actions) = handler.get("actions").and_then(Value::as_array) else {
            return true;
        };
        for action_spec in actions.iter().filter(|a| a.is_object()) {
            let action = match self.build_action(action_spec, observation) {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!("handler action build failed: {}", e);
                    return false;
                }
            };
            if self.config.dry_run {
                continue;
            }
            match self.action_handler.execute(&action) {
                Ok(result) if result.success => {}
                Ok(_) | Err(_) => return false,
            }
            if let Some(wait_ms) = wait_field(action_spec, "after_ms") {
                std::thread::sleep(Duration::from_millis(wait_ms));
            }
        }
        true
    }

    /// Run `before_step` handlers until none matches or the cycle cap hits.
    async fn apply_before_step_handlers(
        &mut self,
        step: &Value,
        spec: &Map<String, Value>,
        mut observation: Observation,
    ) -> Observation {
        let mut handlers: Vec<Value> = Vec::new();
        if let Some(list) = step.get("on_error").and_then(Value::as_array) {
            handlers.extend(
                list.iter()
                    .filter(|h| handler_trigger(h) == "before_step")
                    .cloned(),
            );
        }
        if let Some(list) = spec.get("error_handlers").and_then(Value::as_array) {
            handlers.extend(
                list.iter()
                    .filter(|h| handler_trigger(h) == "before_step")
                    .cloned(),
            );
        }
        if handlers.is_empty() {
            return observation;
        }

        let mut cycles = 0;
        while cycles < self.config.max_handler_cycles {
            cycles += 1;
            let mut matched = false;
            for handler in &handlers {
                let condition_ok = match handler.get("when") {
                    Some(condition) => {
                        evaluate_condition(Some(condition), &observation).is_true()
                    }
                    None => true,
                };
                if !condition_ok {
                    continue;
                }
                matched = true;
                self.execute_handler_actions(handler, &observation);
                if let Ok(fresh) = self.observer.capture().await {
                    observation = fresh;
                }
            }
            if !matched {
                break;
            }
        }
        observation
    }

    /// Evaluate a condition block, optionally polling until a deadline.
    ///
    /// A block is either a bare condition or `{condition, timeout_ms,
    /// poll_interval_ms, mode}`. `best_effort` mode accepts an undecidable
    /// result; strict mode folds it to Unknown, non-strict to True.
    async fn check_condition_block(
        &mut self,
        block: Option<&Value>,
        observation: Observation,
        strict: bool,
    ) -> (Truth, Observation) {
        let Some(block) = block else {
            return (Truth::True, observation);
        };
        if block.is_null() {
            return (Truth::True, observation);
        }

        let (condition, timeout_ms, poll_interval_ms, best_effort) = match block.as_object() {
            Some(map) if map.contains_key("condition") => (
                map.get("condition").cloned().unwrap_or(Value::Null),
                map.get("timeout_ms").and_then(Value::as_u64).unwrap_or(0),
                map.get("poll_interval_ms").and_then(Value::as_u64).unwrap_or(500),
                map.get("mode").and_then(Value::as_str) == Some("best_effort"),
            ),
            _ => (block.clone(), 0, 500, false),
        };

        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        } else {
            None
        };

        let mut observation = observation;
        loop {
            let result = evaluate_condition(Some(&condition), &observation);
            match result {
                Truth::True => return (Truth::True, observation),
                Truth::False => {
                    if deadline.map(|d| Instant::now() >= d).unwrap_or(true) {
                        return (Truth::False, observation);
                    }
                }
                Truth::Unknown => {
                    if best_effort {
                        return (Truth::True, observation);
                    }
                    if deadline.map(|d| Instant::now() >= d).unwrap_or(true) {
                        return (
                            if strict { Truth::Unknown } else { Truth::True },
                            observation,
                        );
                    }
                }
            }
            sleep(Duration::from_millis(poll_interval_ms)).await;
            match self.observer.capture().await {
                Ok(fresh) => observation = fresh,
                Err(e) => {
                    tracing::warn!("poll capture failed: {}", e);
                    return (Truth::Unknown, observation);
                }
            }
        }
    }

    /// Build the concrete action for a step or handler action spec.
    fn build_action(&self, step: &Value, observation: &Observation) -> Result<Value, SkillError> {
        let step_id = step.get("id").and_then(Value::as_str).unwrap_or("");
        let action_name = step
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SkillError::new(SkillErrorCode::Unknown, "Missing action", "build_action")
                    .with_step(step_id)
            })?;

        let mut action = json!({"_metadata": "do", "action": action_name});

        match action_name {
            "Tap" | "Double Tap" | "Long Press" => {
                let point = self
                    .resolve_target(step.get("target"), observation)
                    .ok_or_else(|| {
                        SkillError::new(
                            SkillErrorCode::TargetNotFound,
                            "Target not found",
                            "target",
                        )
                        .with_step(step_id)
                    })?;
                action["element"] = absolute_to_relative(point, observation);
                if action_name == "Long Press" {
                    if let Some(duration_ms) = step.get("duration_ms").and_then(Value::as_u64) {
                        action["duration_ms"] = json!(duration_ms);
                    }
                }
            }
            "Swipe" => {
                let start = self.resolve_target(step.get("start"), observation);
                let end = self.resolve_target(step.get("end"), observation);
                let (Some(start), Some(end)) = (start, end) else {
                    return Err(SkillError::new(
                        SkillErrorCode::TargetNotFound,
                        "Swipe target not found",
                        "target",
                    )
                    .with_step(step_id));
                };
                action["start"] = absolute_to_relative(start, observation);
                action["end"] = absolute_to_relative(end, observation);
                if let Some(duration_ms) = step.get("duration_ms").and_then(Value::as_u64) {
                    action["duration_ms"] = json!(duration_ms);
                }
            }
            "Type" | "Type_Name" => {
                action["text"] = step.get("text").cloned().unwrap_or_else(|| json!(""));
            }
            "Launch" => {
                action["app"] = step.get("app").cloned().unwrap_or(Value::Null);
            }
            "Wait" => {
                if let Some(duration_ms) = step.get("duration_ms").and_then(Value::as_u64) {
                    action["duration"] = json!(format!("{:.1} seconds", duration_ms as f64 / 1000.0));
                } else {
                    action["duration"] =
                        step.get("duration").cloned().unwrap_or_else(|| json!("1 seconds"));
                }
            }
            "Back" | "Home" | "Note" | "Call_API" | "Interact" => {}
            "Take_over" => {
                action["message"] = step
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| json!("User intervention required"));
            }
            other => {
                return Err(SkillError::new(
                    SkillErrorCode::Unknown,
                    format!("Unsupported action: {}", other),
                    "build_action",
                )
                .with_step(step_id));
            }
        }

        if let Some(confirm) = step.get("confirm").and_then(Value::as_str) {
            if matches!(action_name, "Tap" | "Double Tap" | "Long Press") {
                action["message"] = json!(confirm);
            }
        }

        Ok(action)
    }

    /// Resolve a target spec to a pixel point on the current screen.
    fn resolve_target(
        &self,
        target: Option<&Value>,
        observation: &Observation,
    ) -> Option<(i32, i32)> {
        let target = target?;

        if let Some(coords) = target.as_array() {
            return relative_to_absolute(coords, observation);
        }
        let map = target.as_object()?;
        let target_type = map.get("type").and_then(Value::as_str).unwrap_or("coords");

        let mut point = match target_type {
            "coords" => {
                let coords = map
                    .get("coords")
                    .or_else(|| map.get("point"))
                    .and_then(Value::as_array)?;
                match map.get("coords_type").and_then(Value::as_str) {
                    Some("absolute") => {
                        if coords.len() != 2 {
                            return None;
                        }
                        (
                            coords[0].as_i64()? as i32,
                            coords[1].as_i64()? as i32,
                        )
                    }
                    Some("percent") => {
                        if coords.len() != 2 {
                            return None;
                        }
                        (
                            (coords[0].as_f64()? * observation.width() as f64) as i32,
                            (coords[1].as_f64()? * observation.height() as f64) as i32,
                        )
                    }
                    _ => relative_to_absolute(coords, observation)?,
                }
            }
            "selector" => {
                let selector = map.get("selector")?;
                if observation.ui_nodes.is_empty() {
                    return None;
                }
                resolve_selector_to_point(&observation.ui_nodes, selector)?
            }
            "bounds" => {
                let bounds = map.get("bounds").and_then(Value::as_array)?;
                if bounds.len() != 4 {
                    return None;
                }
                let value = |i: usize| bounds[i].as_i64().map(|n| n as i32);
                let (left, top, right, bottom) = (value(0)?, value(1)?, value(2)?, value(3)?);
                ((left + right) / 2, (top + bottom) / 2)
            }
            _ => return None,
        };

        if let Some(offset) = map.get("offset").and_then(Value::as_array) {
            if offset.len() == 2 {
                point.0 += offset[0].as_i64().unwrap_or(0) as i32;
                point.1 += offset[1].as_i64().unwrap_or(0) as i32;
            }
        }
        Some(point)
    }

    async fn backoff(&mut self, attempt: u32, policy: &RetryPolicy) {
        if policy.backoff_ms == 0 {
            return;
        }
        let delay = backoff_delay_ms(
            attempt,
            policy.backoff_ms,
            policy.backoff_multiplier,
            policy.max_backoff_ms,
            policy.jitter_ms,
            &mut self.rng,
        );
        tracing::debug!("backing off {}ms after attempt {}", delay, attempt);
        sleep(Duration::from_millis(delay)).await;
    }
}

fn handler_trigger(handler: &Value) -> &str {
    handler
        .get("trigger")
        .and_then(Value::as_str)
        .unwrap_or("on_error")
}

fn wait_field(step: &Value, key: &str) -> Option<u64> {
    step.get("wait")
        .and_then(Value::as_object)
        .and_then(|wait| wait.get(key))
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
}

/// Merge declared-input defaults, skill vars and caller inputs, weakest
/// first; caller inputs always win. Missing required inputs fail before any
/// device action.
fn prepare_variables(
    spec: &Map<String, Value>,
    inputs: &Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    let mut variables = Map::new();

    match spec.get("inputs") {
        Some(Value::Object(declared)) => {
            for (name, meta) in declared {
                apply_input(&mut variables, name, meta, inputs)?;
            }
        }
        Some(Value::Array(declared)) => {
            for entry in declared {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                apply_input(&mut variables, name, entry, inputs)?;
            }
        }
        _ => {}
    }

    if let Some(vars) = spec.get("vars").and_then(Value::as_object) {
        for (name, value) in vars {
            variables.insert(name.clone(), value.clone());
        }
    }

    for (name, value) in inputs {
        variables.insert(name.clone(), value.clone());
    }
    variables
        .entry("timestamp".to_string())
        .or_insert_with(|| json!(Utc::now().timestamp()));

    // Resolve templates nested inside the variables themselves (defaults
    // referencing other vars).
    match render_templates(&Value::Object(variables.clone()), &variables) {
        Value::Object(rendered) => Ok(rendered),
        _ => Ok(variables),
    }
}

fn apply_input(
    variables: &mut Map<String, Value>,
    name: &str,
    meta: &Value,
    inputs: &Map<String, Value>,
) -> Result<(), String> {
    if let Some(value) = inputs.get(name) {
        variables.insert(name.to_string(), value.clone());
        return Ok(());
    }
    if let Some(default) = meta.get("default") {
        variables.insert(name.to_string(), default.clone());
        return Ok(());
    }
    if meta.get("required").and_then(Value::as_bool).unwrap_or(false) {
        return Err(format!("Missing required input: {}", name));
    }
    Ok(())
}

/// Normalized 0-1000 coordinates to pixel space.
fn relative_to_absolute(coords: &[Value], observation: &Observation) -> Option<(i32, i32)> {
    if coords.len() != 2 {
        return None;
    }
    let x = coords[0].as_f64()?;
    let y = coords[1].as_f64()?;
    Some((
        (x / 1000.0 * observation.width() as f64) as i32,
        (y / 1000.0 * observation.height() as f64) as i32,
    ))
}

/// Pixel point back to the normalized space the device interface expects.
fn absolute_to_relative(point: (i32, i32), observation: &Observation) -> Value {
    let width = observation.width().max(1) as f64;
    let height = observation.height().max(1) as f64;
    let x = ((point.0 as f64 / width) * 1000.0).clamp(0.0, 1000.0) as i64;
    let y = ((point.1 as f64 / height) * 1000.0).clamp(0.0, 1000.0) as i64;
    json!([x, y])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionHandler;
    use crate::skills::loader::load_skill_from_json;
    use crate::skills::testing::{observation_with, MockDevice, ScriptedObservations};

    fn registry_with(spec: Value) -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        registry.register(load_skill_from_json(&spec.to_string(), "<json>").unwrap());
        Arc::new(registry)
    }

    fn quiet_handler(device: Arc<MockDevice>) -> ActionHandler {
        ActionHandler::new(device, Some(Arc::new(|_| true)), Some(Arc::new(|_| {})))
    }

    fn runner_for(
        spec: Value,
        observations: Vec<Observation>,
        device: Arc<MockDevice>,
        config: SkillRunnerConfig,
    ) -> SkillRunner {
        SkillRunner::new(
            registry_with(spec),
            config,
            quiet_handler(device),
            Box::new(ScriptedObservations::new(observations)),
        )
    }

    fn obs(app: &str) -> Observation {
        observation_with(app, &[], Vec::new(), None)
    }

    #[tokio::test]
    async fn test_guard_fails_twice_then_succeeds() {
        let spec = json!({
            "id": "wait_for_app", "name": "w", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "retry": {"max_attempts": 3},
            }],
        });
        let observations = vec![
            obs("Other"),  // initial capture
            obs("Other"),  // attempt 1 guard fails
            obs("Other"),  // attempt 2 guard fails
            obs("Target"), // attempt 3 guard passes
            obs("Target"), // post-action capture
        ];
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(spec, observations, device.clone(), SkillRunnerConfig::default());

        let result = runner.run("wait_for_app", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.report.steps.len(), 1);
        assert_eq!(result.report.steps[0].attempts.len(), 3);
        assert!(!result.report.steps[0].attempts[0].success);
        assert!(!result.report.steps[0].attempts[1].success);
        assert!(result.report.steps[0].attempts[2].success);
        assert_eq!(device.call_log(), vec!["back"]);
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_max() {
        let spec = json!({
            "id": "never_ready", "name": "n", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "retry": {"max_attempts": 2},
            }],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Other")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("never_ready", Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.report.steps[0].attempts.len(), 2);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::ScreenMismatch
        );
    }

    #[tokio::test]
    async fn test_optional_step_continues_on_action_failure() {
        let spec = json!({
            "id": "soft_launch", "name": "s", "version": "1",
            "steps": [
                {"action": "Launch", "app": "GhostApp", "optional": true},
                {"action": "Back"},
            ],
        });
        let device = Arc::new(MockDevice {
            unknown_apps: vec!["GhostApp".to_string()],
            ..MockDevice::default()
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("soft_launch", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.report.steps.len(), 2);
        assert!(result.report.steps[0].success);
        let first_attempt = &result.report.steps[0].attempts[0];
        assert_eq!(
            first_attempt.error.as_ref().unwrap().code,
            SkillErrorCode::ActionFailed
        );
        assert!(device.call_log().contains(&"back".to_string()));
    }

    #[tokio::test]
    async fn test_missing_required_input_fails_before_device_io() {
        let spec = json!({
            "id": "typed", "name": "t", "version": "1",
            "inputs": {"user": {"required": true}},
            "steps": [{"action": "Type", "text": "{{user}}"}],
        });
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("typed", Map::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::PreconditionFailed
        );
        assert_eq!(result.error.as_ref().unwrap().stage, "inputs");
        assert!(device.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_template_expansion_reaches_device() {
        let spec = json!({
            "id": "greet", "name": "g", "version": "1",
            "inputs": {"user": {"required": true}},
            "steps": [{"action": "Type", "text": "hello {{user}}"}],
        });
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let mut inputs = Map::new();
        inputs.insert("user".to_string(), json!("alice"));
        let result = runner.run("greet", inputs).await;
        assert!(result.success, "{:?}", result.error);
        assert!(device
            .call_log()
            .iter()
            .any(|call| call == "type(hello alice)"));
    }

    #[tokio::test]
    async fn test_selector_target_resolves_to_tap() {
        let node = crate::skills::selector::UINode {
            text: "Submit".to_string(),
            resource_id: "btn_submit".to_string(),
            content_desc: String::new(),
            class_name: String::new(),
            clickable: true,
            bounds: (500, 1150, 580, 1250), // center (540, 1200) on 1080x2400
        };
        let spec = json!({
            "id": "press_submit", "name": "p", "version": "1",
            "steps": [{
                "action": "Tap",
                "target": {"type": "selector", "selector": {"resource_id": "btn_submit"}},
            }],
        });
        let device = Arc::new(MockDevice::new());
        let with_node = observation_with("Chrome", &[], vec![node], None);
        let mut runner = runner_for(
            spec,
            vec![with_node],
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("press_submit", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        // (540/1080, 1200/2400) -> (500, 500) normalized.
        assert!(device.call_log().contains(&"tap(500,500)".to_string()));
    }

    #[tokio::test]
    async fn test_unresolved_selector_is_target_not_found() {
        let spec = json!({
            "id": "press_ghost", "name": "p", "version": "1",
            "steps": [{
                "action": "Tap",
                "target": {"type": "selector", "selector": {"text": "Ghost"}},
            }],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("press_ghost", Map::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::TargetNotFound
        );
    }

    #[tokio::test]
    async fn test_escalate_handler_marks_takeover() {
        let spec = json!({
            "id": "guarded", "name": "g", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "on_error": [{
                    "codes": ["SCREEN_MISMATCH"],
                    "resolution": "escalate",
                    "takeover_message": "log in manually",
                }],
            }],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Other")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("guarded", Map::new()).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.requires_takeover);
        assert_eq!(error.details["takeover_message"], "log in manually");
    }

    #[tokio::test]
    async fn test_handler_recovery_actions_then_retry() {
        let spec = json!({
            "id": "dismiss_then_go", "name": "d", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "retry": {"max_attempts": 2},
                "on_error": [{
                    "codes": ["SCREEN_MISMATCH"],
                    "resolution": "retry",
                    "actions": [{"action": "Home"}],
                }],
            }],
        });
        let observations = vec![
            obs("Other"),  // initial
            obs("Other"),  // attempt 1: guard fails, handler runs Home
            obs("Target"), // attempt 2: guard passes
            obs("Target"),
        ];
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            observations,
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("dismiss_then_go", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(device.call_log(), vec!["home", "back"]);
    }

    #[tokio::test]
    async fn test_failing_handler_action_aborts_with_handler_failed() {
        let spec = json!({
            "id": "bad_handler", "name": "b", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "on_error": [{
                    "resolution": "retry",
                    "actions": [{"action": "Launch", "app": "GhostApp"}],
                }],
            }],
        });
        let device = Arc::new(MockDevice {
            unknown_apps: vec!["GhostApp".to_string()],
            ..MockDevice::default()
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Other")],
            device,
            SkillRunnerConfig::default(),
        );
        let result = runner.run("bad_handler", Map::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::HandlerFailed
        );
    }

    #[tokio::test]
    async fn test_before_step_handler_absorbs_overlay() {
        let spec = json!({
            "id": "with_overlay", "name": "w", "version": "1",
            "error_handlers": [{
                "trigger": "before_step",
                "when": {"text_any_contains": ["allow"]},
                "actions": [{"action": "Tap", "target": [500, 500]}],
            }],
            "steps": [{"action": "Back"}],
        });
        let overlay = observation_with("Chrome", &["Allow notifications?"], Vec::new(), None);
        let clean = observation_with("Chrome", &["home screen"], Vec::new(), None);
        let observations = vec![obs("Chrome"), overlay, clean];
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            observations,
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("with_overlay", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(device.call_log(), vec!["tap(500,500)", "back"]);
    }

    #[tokio::test]
    async fn test_precondition_unknown_strict() {
        let spec = json!({
            "id": "needs_text", "name": "n", "version": "1",
            "preconditions": {"text_any": ["welcome"]},
            "steps": [{"action": "Back"}],
        });
        // No extracted text: the condition is undecidable.
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("needs_text", Map::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::PreconditionUnknown
        );
    }

    #[tokio::test]
    async fn test_precondition_best_effort_mode() {
        let spec = json!({
            "id": "lenient", "name": "l", "version": "1",
            "preconditions": {
                "condition": {"text_any": ["welcome"]},
                "mode": "best_effort",
            },
            "steps": [{"action": "Back"}],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("lenient", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_precondition_polling_until_decided() {
        let spec = json!({
            "id": "poll", "name": "p", "version": "1",
            "preconditions": {
                "condition": {"app_is": "Target"},
                "timeout_ms": 5000,
                "poll_interval_ms": 10,
            },
            "steps": [{"action": "Back"}],
        });
        let observations = vec![obs("Other"), obs("Other"), obs("Target")];
        let mut runner = runner_for(
            spec,
            observations,
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("poll", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_postcondition_failure_reported() {
        let spec = json!({
            "id": "post", "name": "p", "version": "1",
            "postconditions": {"app_is": "Target"},
            "steps": [{"action": "Back"}],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Other")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("post", Map::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().unwrap().code,
            SkillErrorCode::PostconditionFailed
        );
    }

    #[tokio::test]
    async fn test_dry_run_dispatches_nothing() {
        let spec = json!({
            "id": "dry", "name": "d", "version": "1",
            "steps": [{"action": "Back"}, {"action": "Home"}],
        });
        let device = Arc::new(MockDevice::new());
        let config = SkillRunnerConfig {
            dry_run: true,
            ..SkillRunnerConfig::default()
        };
        let mut runner = runner_for(spec, vec![obs("Chrome")], device.clone(), config);
        let result = runner.run("dry", Map::new()).await;
        assert!(result.success);
        assert!(device.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let spec = json!({
            "id": "known", "name": "k", "version": "1",
            "steps": [{"action": "Back"}],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("missing", Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().code, SkillErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_common_handlers_merged_behind_step_local() {
        // The step-local handler escalates; the common handler would
        // continue. Step-local is scanned first and must win.
        let spec = json!({
            "id": "priority", "name": "p", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "on_error": [{
                    "codes": ["SCREEN_MISMATCH"],
                    "resolution": "escalate",
                    "takeover_message": "local wins",
                }],
            }],
        });
        let config = SkillRunnerConfig {
            common_error_handlers: vec![json!({
                "codes": ["SCREEN_MISMATCH"],
                "resolution": "continue",
            })],
            ..SkillRunnerConfig::default()
        };
        let mut runner = runner_for(spec, vec![obs("Other")], Arc::new(MockDevice::new()), config);
        let result = runner.run("priority", Map::new()).await;
        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().requires_takeover);
    }

    #[tokio::test]
    async fn test_handler_retry_policy_extends_attempts() {
        // The step itself allows a single attempt; the handler's retry
        // override grants a second one.
        let spec = json!({
            "id": "stubborn", "name": "s", "version": "1",
            "steps": [{
                "action": "Back",
                "guard": {"app_is": "Target"},
                "on_error": [{
                    "codes": ["SCREEN_MISMATCH"],
                    "resolution": "retry",
                    "retry": {"max_attempts": 2},
                }],
            }],
        });
        let observations = vec![
            obs("Other"),  // initial
            obs("Other"),  // attempt 1: guard fails
            obs("Target"), // attempt 2: guard passes
            obs("Target"),
        ];
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            observations,
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("stubborn", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.report.steps[0].attempts.len(), 2);
        assert_eq!(device.call_log(), vec!["back"]);
    }

    #[tokio::test]
    async fn test_vars_override_defaults_inputs_win() {
        let spec = json!({
            "id": "layered", "name": "l", "version": "1",
            "inputs": {
                "greeting": {"default": "from-default"},
                "user": {"default": "nobody"},
            },
            "vars": {"greeting": "from-var"},
            "steps": [{"action": "Type", "text": "{{greeting}} {{user}}"}],
        });
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(
            spec,
            vec![obs("Chrome")],
            device.clone(),
            SkillRunnerConfig::default(),
        );
        let mut inputs = Map::new();
        inputs.insert("user".to_string(), json!("alice"));
        let result = runner.run("layered", inputs).await;
        assert!(result.success, "{:?}", result.error);
        assert!(device
            .call_log()
            .iter()
            .any(|call| call == "type(from-var alice)"));
    }

    #[tokio::test]
    async fn test_postcondition_continue_handler_passes_run() {
        let spec = json!({
            "id": "lenient_post", "name": "l", "version": "1",
            "postconditions": {"app_is": "Target"},
            "error_handlers": [{
                "codes": ["POSTCONDITION_FAILED"],
                "resolution": "continue",
            }],
            "steps": [{"action": "Back"}],
        });
        let mut runner = runner_for(
            spec,
            vec![obs("Other")],
            Arc::new(MockDevice::new()),
            SkillRunnerConfig::default(),
        );
        let result = runner.run("lenient_post", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_skill_handlers_scanned_before_common() {
        // The skill-wide handler continues; the common handler would
        // escalate. Skill-wide wins because it comes first in the scan.
        let spec = json!({
            "id": "soft_guarded", "name": "s", "version": "1",
            "error_handlers": [{
                "codes": ["SCREEN_MISMATCH"],
                "resolution": "continue",
            }],
            "steps": [{"action": "Back", "guard": {"app_is": "Target"}}],
        });
        let config = SkillRunnerConfig {
            common_error_handlers: vec![json!({
                "codes": ["SCREEN_MISMATCH"],
                "resolution": "escalate",
                "takeover_message": "common escalates",
            })],
            ..SkillRunnerConfig::default()
        };
        let mut runner = runner_for(spec, vec![obs("Other")], Arc::new(MockDevice::new()), config);
        let result = runner.run("soft_guarded", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_common_handler_applies_when_no_local() {
        let spec = json!({
            "id": "common_only", "name": "c", "version": "1",
            "steps": [{"action": "Back", "guard": {"app_is": "Target"}}],
        });
        let config = SkillRunnerConfig {
            common_error_handlers: vec![json!({
                "codes": ["SCREEN_MISMATCH"],
                "resolution": "continue",
            })],
            ..SkillRunnerConfig::default()
        };
        let device = Arc::new(MockDevice::new());
        let mut runner = runner_for(spec, vec![obs("Other")], device.clone(), config);
        let result = runner.run("common_only", Map::new()).await;
        assert!(result.success, "{:?}", result.error);
        // Guard failed, handler said continue, so nothing was dispatched.
        assert!(device.call_log().is_empty());
    }
}
