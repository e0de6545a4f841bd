//! Configuration for the dual-tier coordination layer.

use std::collections::HashMap;

use crate::model::ModelConfig;

/// Fast reactive tier settings.
#[derive(Debug, Clone)]
pub struct System1Config {
    /// Minimum gap between liveness fillers, in seconds.
    pub liveness_interval_s: f64,
    /// Bounded random offset applied to tap/swipe points, in normalized
    /// coordinate units.
    pub jitter: u32,
    pub enable_liveness: bool,
    /// Seed for jitter and motion sampling; None draws from entropy.
    pub random_seed: Option<u64>,
}

impl Default for System1Config {
    fn default() -> Self {
        Self {
            liveness_interval_s: 2.0,
            jitter: 6,
            enable_liveness: false,
            random_seed: None,
        }
    }
}

/// Slow planning tier settings.
#[derive(Debug, Clone)]
pub struct System2Config {
    pub enable_skill_routing: bool,
    pub enable_exception_skills: bool,
    pub enable_vision_recovery: bool,
    /// Minimum analyzer confidence before a suggested recovery skill is
    /// accepted.
    pub vision_confidence_threshold: f64,
}

impl Default for System2Config {
    fn default() -> Self {
        Self {
            enable_skill_routing: true,
            enable_exception_skills: true,
            enable_vision_recovery: false,
            vision_confidence_threshold: 0.65,
        }
    }
}

/// Conventions for the skill layering fields.
#[derive(Debug, Clone)]
pub struct SkillLayerConfig {
    pub atomic_level: i64,
    pub flow_level: i64,
    pub recovery_level: i64,
    pub recovery_role: String,
}

impl Default for SkillLayerConfig {
    fn default() -> Self {
        Self {
            atomic_level: 1,
            flow_level: 2,
            recovery_level: 3,
            recovery_role: "recovery".to_string(),
        }
    }
}

/// Top-level coordination configuration.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    pub system1: System1Config,
    pub system2: System2Config,
    pub skill_layers: SkillLayerConfig,
    /// Model used by the vision exception analyzer when enabled.
    pub analyzer_model: Option<ModelConfig>,
    /// Static error-code to recovery-skill mapping, consulted when the
    /// analyzer yields nothing usable.
    pub exception_skill_map: HashMap<String, String>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        let mut exception_skill_map = HashMap::new();
        exception_skill_map.insert("SCREEN_MISMATCH".to_string(), "adapt_ui_change".to_string());
        exception_skill_map.insert("TARGET_NOT_FOUND".to_string(), "adapt_ui_change".to_string());
        exception_skill_map.insert(
            "ACTION_FAILED".to_string(),
            "handle_interaction_error".to_string(),
        );
        exception_skill_map.insert(
            "ACTION_EXCEPTION".to_string(),
            "handle_device_error".to_string(),
        );
        exception_skill_map.insert("DEVICE_ERROR".to_string(), "handle_device_error".to_string());
        exception_skill_map.insert(
            "POSTCONDITION_FAILED".to_string(),
            "handle_postcondition_error".to_string(),
        );
        exception_skill_map.insert(
            "TIMEOUT".to_string(),
            "handle_postcondition_error".to_string(),
        );
        exception_skill_map.insert(
            "ERROR_SCREEN_DETECTED".to_string(),
            "handle_interaction_error".to_string(),
        );

        Self {
            system1: System1Config::default(),
            system2: System2Config::default(),
            skill_layers: SkillLayerConfig::default(),
            analyzer_model: None,
            exception_skill_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_exception_map() {
        let config = CoordinationConfig::default();
        assert_eq!(
            config.exception_skill_map.get("TARGET_NOT_FOUND").unwrap(),
            "adapt_ui_change"
        );
        assert!(config.system2.enable_skill_routing);
        assert!(!config.system2.enable_vision_recovery);
    }
}
