//! Slow planning tier: task planning and failure recovery decisions.

use serde_json::Map;
use std::sync::Arc;

use crate::skills::{
    Observation, RouteAction, SkillError, SkillLearningRecorder, SkillRegistry, SkillRouter,
};

use super::analyzer::VisionExceptionAnalyzer;
use super::config::CoordinationConfig;
use super::types::{ExceptionContext, Plan, PlanStep};

/// What the recovery pipeline decided.
#[derive(Debug, Clone)]
pub enum RecoveryDecision {
    /// Run this recovery skill, then retry the failed step.
    Skill(PlanStep),
    /// Nothing usable; the coordinator surfaces the original failure.
    None(String),
}

/// Turns tasks into plans and runtime errors into recovery decisions.
pub struct SlowPlannerSystem {
    config: CoordinationConfig,
    registry: Arc<SkillRegistry>,
    router: SkillRouter,
    analyzer: Option<VisionExceptionAnalyzer>,
    learning: Option<SkillLearningRecorder>,
}

impl SlowPlannerSystem {
    pub fn new(
        config: CoordinationConfig,
        registry: Arc<SkillRegistry>,
        router: SkillRouter,
        analyzer: Option<VisionExceptionAnalyzer>,
        learning: Option<SkillLearningRecorder>,
    ) -> Self {
        Self {
            config,
            registry,
            router,
            analyzer,
            learning,
        }
    }

    /// Plan a task. Skill routing decides everything: a block or shadow
    /// match yields a blocked plan, a skill match a one-step plan, and no
    /// match a blocked plan recorded as a learning case.
    pub fn plan(&self, task: &str, observation: Option<&Observation>) -> Plan {
        if !self.config.system2.enable_skill_routing {
            return Plan::blocked(task, "skill_routing_disabled");
        }

        let decision = self.router.select(task, observation);
        match decision.action {
            RouteAction::Block => {
                tracing::warn!("task blocked by routing: {}", decision.reason);
                let mut plan = Plan::blocked(task, "blocked");
                plan.blocked_reason = decision.reason;
                plan
            }
            RouteAction::Shadow => {
                if let (Some(learning), Some(directive)) = (&self.learning, &decision.directive) {
                    if let Err(e) = learning.record_shadow_match(
                        task,
                        observation,
                        &directive.skill_id,
                        "shadow-match",
                    ) {
                        tracing::warn!("shadow case capture failed: {}", e);
                    }
                }
                Plan::blocked(task, "shadow-match")
            }
            RouteAction::Skill => {
                let directive = decision.directive.expect("skill decision carries a directive");
                Plan::new(
                    task,
                    vec![PlanStep::skill(
                        "skill_1",
                        directive.skill_id,
                        directive.inputs,
                        directive.reason,
                    )],
                    decision.reason,
                )
            }
            RouteAction::None => {
                if let Some(learning) = &self.learning {
                    if let Err(e) = learning.record_case(
                        task,
                        "no_skill_match",
                        observation,
                        crate::skills::CaseContext::default(),
                    ) {
                        tracing::warn!("case capture failed: {}", e);
                    }
                }
                Plan::blocked(task, "no_skill_match")
            }
        }
    }

    /// Decide how to recover from a skill failure.
    ///
    /// The vision analyzer is consulted first (when enabled); its suggestion
    /// is accepted only above the confidence threshold and only for skills
    /// registered at the recovery role/level. Otherwise the static
    /// error-code map is tried. Either path requires the skill to exist.
    pub async fn recover(
        &self,
        error: &SkillError,
        observation: Option<&Observation>,
    ) -> RecoveryDecision {
        if !self.config.system2.enable_exception_skills {
            return RecoveryDecision::None("exception_skills_disabled".to_string());
        }

        if let Some(skill_id) = self.analyze_exception(error, observation).await {
            return RecoveryDecision::Skill(PlanStep::skill(
                format!("recovery_{}", skill_id),
                skill_id,
                Map::new(),
                "vision_recovery",
            ));
        }

        if let Some(skill_id) = self.config.exception_skill_map.get(error.code.as_str()) {
            if self.registry.get(skill_id).is_some() {
                return RecoveryDecision::Skill(PlanStep::skill(
                    format!("recovery_{}", skill_id),
                    skill_id.clone(),
                    Map::new(),
                    "mapped_exception",
                ));
            }
        }

        RecoveryDecision::None("no_recovery_skill".to_string())
    }

    async fn analyze_exception(
        &self,
        error: &SkillError,
        observation: Option<&Observation>,
    ) -> Option<String> {
        if !self.config.system2.enable_vision_recovery {
            return None;
        }
        let analyzer = self.analyzer.as_ref()?;
        let observation = observation?;
        let recovery_skills = self.list_recovery_skills();
        if recovery_skills.is_empty() {
            return None;
        }

        let context = ExceptionContext::from_error(error);
        let analysis = analyzer
            .analyze(observation, &context, &recovery_skills)
            .await?;
        if analysis.confidence < self.config.system2.vision_confidence_threshold {
            tracing::debug!(
                "analyzer confidence {:.2} below threshold, ignoring suggestion",
                analysis.confidence
            );
            return None;
        }
        let suggested = analysis.suggested_skill?;
        if recovery_skills.iter().any(|id| *id == suggested) {
            Some(suggested)
        } else {
            None
        }
    }

    /// Skills registered at the recovery level or role.
    fn list_recovery_skills(&self) -> Vec<String> {
        let layers = &self.config.skill_layers;
        self.registry
            .list()
            .iter()
            .filter(|skill| {
                skill.level() == Some(layers.recovery_level)
                    || skill.role() == Some(layers.recovery_role.as_str())
            })
            .map(|skill| skill.skill_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{
        load_skill_from_json, SkillErrorCode, SkillRouterConfig,
    };
    use crate::skills::testing::observation_with;
    use serde_json::json;

    fn registry_with(specs: &[serde_json::Value]) -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        for spec in specs {
            registry.register(load_skill_from_json(&spec.to_string(), "<json>").unwrap());
        }
        Arc::new(registry)
    }

    fn planner(registry: Arc<SkillRegistry>, config: CoordinationConfig) -> SlowPlannerSystem {
        let router = SkillRouter::new(registry.clone(), SkillRouterConfig::default());
        SlowPlannerSystem::new(config, registry, router, None, None)
    }

    #[test]
    fn test_plan_skill_match() {
        let registry = registry_with(&[json!({
            "id": "open_settings", "name": "o", "version": "1",
            "routing": {"keywords": ["settings"]},
            "steps": [{"action": "Back"}],
        })]);
        let system2 = planner(registry, CoordinationConfig::default());
        let plan = system2.plan("open the settings page", None);
        assert!(!plan.blocked);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].skill_id.as_deref(), Some("open_settings"));
    }

    #[test]
    fn test_plan_no_match_is_blocked() {
        let system2 = planner(registry_with(&[]), CoordinationConfig::default());
        let plan = system2.plan("do something novel", None);
        assert!(plan.blocked);
        assert_eq!(plan.blocked_reason, "no_skill_match");
    }

    #[test]
    fn test_plan_respects_routing_toggle() {
        let mut config = CoordinationConfig::default();
        config.system2.enable_skill_routing = false;
        let system2 = planner(registry_with(&[]), config);
        let plan = system2.plan("anything", None);
        assert!(plan.blocked);
        assert_eq!(plan.blocked_reason, "skill_routing_disabled");
    }

    #[tokio::test]
    async fn test_recover_via_static_map() {
        let registry = registry_with(&[json!({
            "id": "adapt_ui_change", "name": "a", "version": "1", "role": "recovery",
            "steps": [{"action": "Back"}],
        })]);
        let system2 = planner(registry, CoordinationConfig::default());
        let error = SkillError::new(SkillErrorCode::TargetNotFound, "gone", "target");
        match system2.recover(&error, None).await {
            RecoveryDecision::Skill(step) => {
                assert_eq!(step.skill_id.as_deref(), Some("adapt_ui_change"));
                assert_eq!(step.description, "mapped_exception");
            }
            RecoveryDecision::None(reason) => panic!("no recovery: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_recover_requires_registered_skill() {
        let system2 = planner(registry_with(&[]), CoordinationConfig::default());
        let error = SkillError::new(SkillErrorCode::TargetNotFound, "gone", "target");
        match system2.recover(&error, None).await {
            RecoveryDecision::None(reason) => assert_eq!(reason, "no_recovery_skill"),
            RecoveryDecision::Skill(_) => panic!("unexpected recovery"),
        }
    }

    #[tokio::test]
    async fn test_recover_disabled() {
        let mut config = CoordinationConfig::default();
        config.system2.enable_exception_skills = false;
        let system2 = planner(registry_with(&[]), config);
        let error = SkillError::new(SkillErrorCode::ActionFailed, "x", "action");
        match system2.recover(&error, None).await {
            RecoveryDecision::None(reason) => assert_eq!(reason, "exception_skills_disabled"),
            RecoveryDecision::Skill(_) => panic!("unexpected recovery"),
        }
    }

    #[test]
    fn test_shadow_plan_records_case() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&[json!({
            "id": "auto_gen", "name": "a", "version": "1", "status": "shadow",
            "routing": {"keywords": ["share"]},
            "steps": [{"action": "Back"}],
        })]);
        let router = SkillRouter::new(registry.clone(), SkillRouterConfig::default());
        let system2 = SlowPlannerSystem::new(
            CoordinationConfig::default(),
            registry,
            router,
            None,
            Some(SkillLearningRecorder::new(dir.path())),
        );
        let observation = observation_with("Chrome", &[], Vec::new(), None);
        let plan = system2.plan("share this", Some(&observation));
        assert!(plan.blocked);
        assert_eq!(plan.blocked_reason, "shadow-match");
        // One dated case directory was written.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
