//! Fast reactive tier: atomic intents with humanized motion.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Instant;

use crate::actions::{ActionHandler, ActionResult};
use crate::device::NORMALIZED_COORDINATE_MAX;
use crate::skills::Observation;

use super::config::System1Config;
use super::types::Intent;

/// A named swipe pacing style.
#[derive(Debug, Clone, Copy)]
struct MotionProfile {
    duration_range_ms: (u64, u64),
}

fn motion_profile(style: Option<&str>) -> MotionProfile {
    match style {
        Some("fast_skip") => MotionProfile {
            duration_range_ms: (150, 250),
        },
        Some("hesitate") => MotionProfile {
            duration_range_ms: (800, 1200),
        },
        // Default pacing reads like unhurried browsing.
        _ => MotionProfile {
            duration_range_ms: (400, 600),
        },
    }
}

/// Executes single atomic intents with jittered coordinates and paced
/// swipe timing, plus a rate-limited idle filler that keeps the UI alive
/// between plan steps.
pub struct FastActionSystem {
    action_handler: ActionHandler,
    config: System1Config,
    rng: StdRng,
    last_liveness: Option<Instant>,
}

impl FastActionSystem {
    pub fn new(action_handler: ActionHandler, config: System1Config) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            action_handler,
            config,
            rng,
            last_liveness: None,
        }
    }

    /// Translate an intent into an action and execute it. Returns `None`
    /// when the intent cannot be expressed as an action.
    pub fn execute_intent(&mut self, intent: &Intent, _observation: Option<&Observation>) -> Option<ActionResult> {
        let action = self.build_action(intent)?;
        match self.action_handler.execute(&action) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!("intent dispatch failed: {}", e);
                Some(ActionResult::failure(e.to_string()))
            }
        }
    }

    /// Inject a short wait if enough time passed since the last one.
    /// Keeps the UI session warm without performing an intrusive action.
    pub fn maintain_liveness(&mut self) {
        if !self.config.enable_liveness {
            return;
        }
        let interval = self.config.liveness_interval_s;
        if let Some(last) = self.last_liveness {
            if last.elapsed().as_secs_f64() < interval {
                return;
            }
        }
        self.last_liveness = Some(Instant::now());
        let wait_s = self.rng.gen_range(0.3..0.8);
        let action = json!({
            "_metadata": "do",
            "action": "Wait",
            "duration": format!("{:.2} seconds", wait_s),
        });
        if let Err(e) = self.action_handler.execute(&action) {
            tracing::debug!("liveness wait failed: {}", e);
        }
    }

    fn build_action(&mut self, intent: &Intent) -> Option<Value> {
        let params = &intent.params;
        match intent.name.to_lowercase().as_str() {
            "tap" | "click" => {
                let element = params.get("element").or_else(|| params.get("coords"))?;
                let element = self.apply_jitter(element)?;
                Some(json!({"_metadata": "do", "action": "Tap", "element": element}))
            }
            "swipe" => {
                let start = self.apply_jitter(params.get("start")?)?;
                let end = self.apply_jitter(params.get("end")?)?;
                let style = params
                    .get("style")
                    .or_else(|| params.get("intent"))
                    .and_then(Value::as_str);
                let profile = motion_profile(style);
                let (low, high) = profile.duration_range_ms;
                let duration_ms = self.rng.gen_range(low..=high);
                Some(json!({
                    "_metadata": "do",
                    "action": "Swipe",
                    "start": start,
                    "end": end,
                    "duration_ms": duration_ms,
                }))
            }
            "type" | "input" => {
                let text = params.get("text")?;
                Some(json!({"_metadata": "do", "action": "Type", "text": text}))
            }
            "wait" => {
                let duration = params
                    .get("duration")
                    .and_then(Value::as_str)
                    .unwrap_or("1 seconds");
                Some(json!({"_metadata": "do", "action": "Wait", "duration": duration}))
            }
            "back" => Some(json!({"_metadata": "do", "action": "Back"})),
            "home" => Some(json!({"_metadata": "do", "action": "Home"})),
            _ => None,
        }
    }

    /// Offset a normalized [x, y] pair by bounded random jitter.
    fn apply_jitter(&mut self, element: &Value) -> Option<Value> {
        let coords = element.as_array()?;
        if coords.len() != 2 {
            return None;
        }
        let x = coords[0].as_i64()?;
        let y = coords[1].as_i64()?;
        let jitter = self.config.jitter as i64;
        if jitter == 0 {
            return Some(json!([x, y]));
        }
        let max = NORMALIZED_COORDINATE_MAX as i64;
        let dx = self.rng.gen_range(-jitter..=jitter);
        let dy = self.rng.gen_range(-jitter..=jitter);
        Some(json!([
            (x + dx).clamp(0, max),
            (y + dy).clamp(0, max),
        ]))
    }
}
