//! Drives plans to completion across the fast and slow tiers.

use crate::skills::{Observation, SkillRunner};

use super::system1::FastActionSystem;
use super::system2::{RecoveryDecision, SlowPlannerSystem};
use super::types::{Plan, PlanStepKind};

/// Executes one task at a time: plan, run each step through the right tier,
/// and on skill failure attempt exactly one recovery-then-retry cycle.
pub struct Coordinator {
    system1: FastActionSystem,
    system2: SlowPlannerSystem,
    runner: SkillRunner,
}

impl Coordinator {
    pub fn new(system1: FastActionSystem, system2: SlowPlannerSystem, runner: SkillRunner) -> Self {
        Self {
            system1,
            system2,
            runner,
        }
    }

    pub fn runner(&self) -> &SkillRunner {
        &self.runner
    }

    /// Run a task to completion and return the final status message.
    /// Not re-entrant: call once per task.
    pub async fn run(&mut self, task: &str) -> String {
        let observation = self.runner.capture_observation().await;
        let plan = self.system2.plan(task, observation.as_ref());
        self.execute_plan(plan, observation).await
    }

    /// Execute an already-built plan. Split out so callers with their own
    /// planning (or tests) can drive the loop directly.
    pub async fn execute_plan(&mut self, plan: Plan, mut observation: Option<Observation>) -> String {
        if plan.blocked {
            if plan.blocked_reason == "no_skill_match" {
                return "No matching skill for task".to_string();
            }
            return format!("Blocked: {}", plan.blocked_reason);
        }

        for step in &plan.steps {
            match step.kind {
                PlanStepKind::Llm => {
                    return "LLM engine is disabled".to_string();
                }
                PlanStepKind::Intent => {
                    let Some(intent) = &step.intent else {
                        return "Intent execution failed".to_string();
                    };
                    let result = self.system1.execute_intent(intent, observation.as_ref());
                    if result.map(|r| r.success) != Some(true) {
                        return "Intent execution failed".to_string();
                    }
                    observation = self.runner.capture_observation().await;
                    self.system1.maintain_liveness();
                }
                PlanStepKind::Skill => {
                    let Some(skill_id) = step.skill_id.as_deref() else {
                        return "Task failed".to_string();
                    };
                    let result = self.runner.run(skill_id, step.inputs.clone()).await;
                    if result.success {
                        observation = self.runner.capture_observation().await;
                        continue;
                    }

                    let Some(error) = result.error else {
                        return non_empty(result.message, "Task failed");
                    };
                    if error.requires_takeover {
                        tracing::warn!("takeover required, stopping: {}", error);
                        return non_empty(result.message, "Manual takeover required");
                    }

                    match self.system2.recover(&error, observation.as_ref()).await {
                        RecoveryDecision::Skill(recovery_step) => {
                            let recovery_skill = recovery_step
                                .skill_id
                                .as_deref()
                                .unwrap_or_default()
                                .to_string();
                            tracing::info!(
                                "recovering from {} with skill '{}'",
                                error.code,
                                recovery_skill
                            );
                            let recovery_result = self
                                .runner
                                .run(&recovery_skill, recovery_step.inputs.clone())
                                .await;
                            if !recovery_result.success {
                                return non_empty(recovery_result.message, "Recovery failed");
                            }
                            // Recovery landed; the original step gets one
                            // more chance.
                            let retry_result =
                                self.runner.run(skill_id, step.inputs.clone()).await;
                            if retry_result.success {
                                observation = self.runner.capture_observation().await;
                                continue;
                            }
                            return non_empty(
                                retry_result.message,
                                "Task failed after recovery",
                            );
                        }
                        RecoveryDecision::None(reason) => {
                            tracing::debug!("no recovery available: {}", reason);
                            return non_empty(result.message, "Task failed");
                        }
                    }
                }
            }
        }

        "Task completed".to_string()
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionHandler;
    use crate::coordination::config::{CoordinationConfig, System1Config};
    use crate::coordination::types::{Intent, PlanStep};
    use crate::skills::testing::{observation_with, MockDevice, ScriptedObservations};
    use crate::skills::{
        load_skill_from_json, SkillRegistry, SkillRouter, SkillRouterConfig, SkillRunner,
        SkillRunnerConfig, UINode,
    };
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn registry_with(specs: &[Value]) -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        for spec in specs {
            registry.register(load_skill_from_json(&spec.to_string(), "<json>").unwrap());
        }
        Arc::new(registry)
    }

    fn coordinator(
        registry: Arc<SkillRegistry>,
        observations: Vec<crate::skills::Observation>,
        device: Arc<MockDevice>,
    ) -> Coordinator {
        let handler = |device: Arc<MockDevice>| {
            ActionHandler::new(device, Some(Arc::new(|_| true)), Some(Arc::new(|_| {})))
        };
        let runner = SkillRunner::new(
            registry.clone(),
            SkillRunnerConfig::default(),
            handler(device.clone()),
            Box::new(ScriptedObservations::new(observations)),
        );
        let system1 = FastActionSystem::new(
            handler(device),
            System1Config {
                jitter: 0,
                random_seed: Some(1),
                ..System1Config::default()
            },
        );
        let router = SkillRouter::new(registry.clone(), SkillRouterConfig::default());
        let system2 = SlowPlannerSystem::new(
            CoordinationConfig::default(),
            registry,
            router,
            None,
            None,
        );
        Coordinator::new(system1, system2, runner)
    }

    fn obs(app: &str) -> crate::skills::Observation {
        observation_with(app, &[], Vec::new(), None)
    }

    #[tokio::test]
    async fn test_recovery_then_retry_completes_task() {
        let registry = registry_with(&[
            json!({
                "id": "open_item", "name": "o", "version": "1",
                "routing": {"keywords": ["open"]},
                "steps": [{
                    "action": "Tap",
                    "target": {"type": "selector", "selector": {"text": "Item"}},
                }],
            }),
            json!({
                "id": "adapt_ui_change", "name": "a", "version": "1", "role": "recovery",
                "steps": [{"action": "Back"}],
            }),
        ]);

        let item_node = UINode {
            text: "Item".to_string(),
            resource_id: String::new(),
            content_desc: String::new(),
            class_name: String::new(),
            clickable: true,
            bounds: (440, 1100, 640, 1300),
        };
        // Captures 1-7: the item is missing (original run fails with
        // TARGET_NOT_FOUND, recovery runs). Capture 8 onward: it is back.
        let mut observations = vec![obs("Chrome"); 7];
        observations.push(observation_with("Chrome", &[], vec![item_node], None));

        let device = Arc::new(MockDevice::new());
        let mut coordinator = coordinator(registry, observations, device.clone());

        let result = coordinator.run("open the item").await;
        assert_eq!(result, "Task completed");
        // Recovery's Back ran before the retried Tap.
        assert_eq!(device.call_log(), vec!["back", "tap(500,500)"]);
    }

    #[tokio::test]
    async fn test_no_matching_skill() {
        let mut coordinator = coordinator(
            registry_with(&[]),
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
        );
        let result = coordinator.run("do something unknown").await;
        assert_eq!(result, "No matching skill for task");
    }

    #[tokio::test]
    async fn test_takeover_stops_without_recovery() {
        let registry = registry_with(&[
            json!({
                "id": "guarded_flow", "name": "g", "version": "1",
                "routing": {"keywords": ["guarded"]},
                "steps": [{
                    "action": "Back",
                    "guard": {"app_is": "Target"},
                    "on_error": [{
                        "codes": ["SCREEN_MISMATCH"],
                        "resolution": "escalate",
                        "takeover_message": "please log in",
                    }],
                }],
            }),
            // Registered recovery for SCREEN_MISMATCH that must NOT run.
            json!({
                "id": "adapt_ui_change", "name": "a", "version": "1", "role": "recovery",
                "steps": [{"action": "Home"}],
            }),
        ]);
        let device = Arc::new(MockDevice::new());
        let mut coordinator = coordinator(registry, vec![obs("Chrome")], device.clone());

        let result = coordinator.run("run the guarded flow").await;
        assert_eq!(result, "Step guard failed");
        assert!(!device.call_log().contains(&"home".to_string()));
    }

    #[tokio::test]
    async fn test_failed_recovery_stops() {
        let registry = registry_with(&[
            json!({
                "id": "open_item", "name": "o", "version": "1",
                "routing": {"keywords": ["open"]},
                "steps": [{
                    "action": "Tap",
                    "target": {"type": "selector", "selector": {"text": "Item"}},
                }],
            }),
            // Recovery exists but its own guard never passes.
            json!({
                "id": "adapt_ui_change", "name": "a", "version": "1", "role": "recovery",
                "steps": [{"action": "Back", "guard": {"app_is": "Never"}}],
            }),
        ]);
        let device = Arc::new(MockDevice::new());
        let mut coordinator = coordinator(registry, vec![obs("Chrome")], device.clone());

        let result = coordinator.run("open the item").await;
        assert_eq!(result, "Step guard failed");
        assert!(device.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_intent_step_goes_through_system1() {
        let device = Arc::new(MockDevice::new());
        let mut coordinator = coordinator(
            registry_with(&[]),
            vec![obs("Chrome")],
            device.clone(),
        );

        let mut params = Map::new();
        params.insert("element".to_string(), json!([300, 400]));
        let plan = Plan::new(
            "tap somewhere",
            vec![PlanStep::intent("intent_1", Intent::new("tap", params))],
            "test",
        );
        let result = coordinator.execute_plan(plan, None).await;
        assert_eq!(result, "Task completed");
        assert_eq!(device.call_log(), vec!["tap(300,400)"]);
    }

    #[tokio::test]
    async fn test_llm_step_is_refused() {
        let mut coordinator = coordinator(
            registry_with(&[]),
            vec![obs("Chrome")],
            Arc::new(MockDevice::new()),
        );
        let plan = Plan::new(
            "free-form task",
            vec![PlanStep {
                step_id: "llm_1".to_string(),
                kind: PlanStepKind::Llm,
                skill_id: None,
                inputs: Map::new(),
                intent: None,
                description: String::new(),
            }],
            "test",
        );
        let result = coordinator.execute_plan(plan, None).await;
        assert_eq!(result, "LLM engine is disabled");
    }
}
