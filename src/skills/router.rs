//! Task-to-skill routing: directives, scoring, shadow handling, risk gates.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::skills::conditions::{evaluate_condition, Truth};
use crate::skills::observation::Observation;
use crate::skills::registry::SkillRegistry;
use crate::skills::schema::SkillDefinition;
use crate::skills::vocab::expand_vocab_refs;

static INLINE_DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)skill:([^\s\]|]+)").unwrap());

/// A resolved skill selection: which skill, with what inputs, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillDirective {
    pub skill_id: String,
    pub inputs: Map<String, Value>,
    pub reason: String,
}

/// What the router decided to do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Execute the directive's skill.
    Skill,
    /// A shadow skill matched; report it but do not execute.
    Shadow,
    /// The task must not proceed (whitelist/risk policy).
    Block,
    /// No skill applies.
    None,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub action: RouteAction,
    pub directive: Option<SkillDirective>,
    pub reason: String,
}

impl RoutingDecision {
    fn plain(action: RouteAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            directive: None,
            reason: reason.into(),
        }
    }

    fn with_directive(action: RouteAction, directive: SkillDirective) -> Self {
        let reason = directive.reason.clone();
        Self {
            action,
            directive: Some(directive),
            reason,
        }
    }
}

/// Router policy knobs.
#[derive(Debug, Clone)]
pub struct SkillRouterConfig {
    pub enabled: bool,
    /// Boost high/medium-risk skills so risky tasks prefer scripted paths.
    pub risk_first: bool,
    pub min_score: f64,
    pub allow_directive: bool,
    /// Let shadow-status skills execute like ordinary ones (promotion tests).
    pub allow_shadow_execution: bool,
    pub enforce_skill_whitelist: bool,
    pub skill_whitelist: Vec<String>,
    /// When set, tasks hitting a risk keyword must be handled by a
    /// whitelisted skill or get blocked.
    pub enforce_on_risk: bool,
    pub risk_keywords: Vec<String>,
}

impl Default for SkillRouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            risk_first: true,
            min_score: 1.0,
            allow_directive: true,
            allow_shadow_execution: false,
            enforce_skill_whitelist: false,
            skill_whitelist: Vec::new(),
            enforce_on_risk: false,
            risk_keywords: Vec::new(),
        }
    }
}

/// Maps a task string (plus the current observation) to a routing decision.
///
/// Scoring is a pure function of (task, observation, registry): the registry
/// iterates in insertion order and ties keep that order, so identical inputs
/// always produce the identical decision.
pub struct SkillRouter {
    registry: Arc<SkillRegistry>,
    config: SkillRouterConfig,
}

impl SkillRouter {
    pub fn new(registry: Arc<SkillRegistry>, config: SkillRouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn select(&self, task: &str, observation: Option<&Observation>) -> RoutingDecision {
        if !self.config.enabled {
            return RoutingDecision::plain(RouteAction::None, "routing-disabled");
        }

        if self.config.allow_directive {
            if let Some(directive) = parse_directive(task) {
                return self.resolve_directive(directive, task);
            }
        }

        let mut candidates: Vec<(f64, SkillDirective)> = Vec::new();
        let mut shadow_candidates: Vec<(f64, SkillDirective)> = Vec::new();

        for skill in self.registry.list() {
            let (score, reason) = self.score_skill(skill, task, observation);
            if score < self.config.min_score {
                continue;
            }
            let directive = SkillDirective {
                skill_id: skill.skill_id.clone(),
                inputs: Map::new(),
                reason: reason.to_string(),
            };
            if skill.is_shadow() && !self.config.allow_shadow_execution {
                shadow_candidates.push((score, directive));
            } else {
                candidates.push((score, directive));
            }
        }

        // Stable sort: equal scores keep registry order.
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        shadow_candidates
            .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((score, directive)) = candidates.into_iter().next() {
            if self.is_blocked(&directive.skill_id, task) {
                return RoutingDecision::plain(RouteAction::Block, "whitelist-block");
            }
            tracing::debug!(
                "routing task to skill '{}' (score {:.1}, {})",
                directive.skill_id,
                score,
                directive.reason
            );
            return RoutingDecision::with_directive(RouteAction::Skill, directive);
        }

        if let Some((_, directive)) = shadow_candidates.into_iter().next() {
            return RoutingDecision::with_directive(RouteAction::Shadow, directive);
        }

        if self.risk_blocks(task) {
            return RoutingDecision::plain(RouteAction::Block, "risk-requires-skill");
        }
        RoutingDecision::plain(RouteAction::None, "no-match")
    }

    fn resolve_directive(&self, directive: SkillDirective, task: &str) -> RoutingDecision {
        if self.is_blocked(&directive.skill_id, task) {
            return RoutingDecision::plain(RouteAction::Block, "whitelist-block");
        }
        match self.registry.get(&directive.skill_id) {
            Some(skill) => {
                if skill.is_shadow() && !self.config.allow_shadow_execution {
                    RoutingDecision::with_directive(RouteAction::Shadow, directive)
                } else {
                    RoutingDecision::with_directive(RouteAction::Skill, directive)
                }
            }
            None => RoutingDecision::plain(RouteAction::None, "directive-unknown-skill"),
        }
    }

    /// Score one skill's routing block against the task/observation.
    /// A zero return means disqualified.
    fn score_skill(
        &self,
        skill: &SkillDefinition,
        task: &str,
        observation: Option<&Observation>,
    ) -> (f64, &'static str) {
        let routing = match skill.routing() {
            Some(routing) => routing,
            None => return (0.0, "no-routing"),
        };
        let vocab = skill.spec.get("vocab").and_then(Value::as_object);

        let mut score = routing
            .get("priority")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let mut reason = "routing";

        if let Some(keywords) = routing.get("keywords").and_then(Value::as_array) {
            if !keywords.is_empty() {
                let expanded = expand_vocab_refs(keywords, vocab);
                let lowered = task.to_lowercase();
                let hits = expanded
                    .iter()
                    .filter(|kw| !kw.is_empty() && lowered.contains(&kw.to_lowercase()))
                    .count();
                let mode = routing
                    .get("keyword_mode")
                    .and_then(Value::as_str)
                    .unwrap_or("any");
                if hits == 0 || (mode == "all" && hits < expanded.len()) {
                    return (0.0, "keyword-miss");
                }
                score += hits as f64 * 10.0;
                reason = "keyword";
            }
        }

        if let Some(patterns) = routing.get("task_regex").and_then(Value::as_array) {
            if !patterns.is_empty() {
                let expanded = expand_vocab_refs(patterns, vocab);
                let matched = expanded.iter().any(|pattern| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map(|re| re.is_match(task))
                        .unwrap_or(false)
                });
                if !matched {
                    return (0.0, "regex-miss");
                }
                score += 8.0;
                reason = "regex";
            }
        }

        if let (Some(require_app), Some(observation)) = (routing.get("require_app"), observation) {
            let matched = match require_app {
                Value::String(app) => observation.app_name == *app,
                Value::Array(apps) => apps
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|app| observation.app_name == app),
                _ => true,
            };
            if !matched {
                return (0.0, "app-miss");
            }
            score += 5.0;
        }

        if let (Some(preconditions), Some(observation)) =
            (routing.get("preconditions"), observation)
        {
            match evaluate_condition(Some(preconditions), observation) {
                Truth::False => return (0.0, "precondition-miss"),
                Truth::True => score += 4.0,
                Truth::Unknown => {}
            }
        }

        if self.config.risk_first {
            match skill.spec.get("risk").and_then(Value::as_str) {
                Some("high") => score += 6.0,
                Some("medium") => score += 3.0,
                _ => {}
            }
        }

        (score, reason)
    }

    fn risk_blocks(&self, task: &str) -> bool {
        if !self.config.enforce_on_risk {
            return false;
        }
        let lowered = task.to_lowercase();
        self.config
            .risk_keywords
            .iter()
            .filter(|kw| !kw.is_empty())
            .any(|kw| lowered.contains(&kw.to_lowercase()))
    }

    fn is_blocked(&self, skill_id: &str, task: &str) -> bool {
        let whitelisted = self.config.skill_whitelist.iter().any(|id| id == skill_id);
        if self.config.enforce_skill_whitelist && !whitelisted {
            return true;
        }
        if self.risk_blocks(task) && !whitelisted {
            return true;
        }
        false
    }
}

/// Parse an explicit directive out of a task string.
///
/// Two forms: a JSON object (`{"skill": "login", "inputs": {…}}`, `skill_id`
/// also accepted) or an inline token (`skill:login|{"user":"a"}`).
pub fn parse_directive(task: &str) -> Option<SkillDirective> {
    let text = task.trim();
    if text.starts_with('{') && text.ends_with('}') {
        if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(text) {
            let skill_id = payload
                .get("skill_id")
                .or_else(|| payload.get("skill"))
                .and_then(Value::as_str);
            if let Some(skill_id) = skill_id {
                let inputs = payload
                    .get("inputs")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                return Some(SkillDirective {
                    skill_id: skill_id.to_string(),
                    inputs,
                    reason: "json-directive".to_string(),
                });
            }
        }
    }

    let caps = INLINE_DIRECTIVE_RE.captures(task)?;
    let skill_id = caps[1].trim().to_string();
    let mut inputs = Map::new();
    if let Some((_, raw_inputs)) = task.split_once('|') {
        if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(raw_inputs.trim()) {
            inputs = parsed;
        }
    }
    Some(SkillDirective {
        skill_id,
        inputs,
        reason: "inline-directive".to_string(),
    })
}
