//! Assembly of the full agent: registry, runner, router, both tiers, and
//! the coordinator, from configuration.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::{ActionHandler, ConfirmationCallback, TakeoverCallback};
use crate::adb::AdbDevice;
use crate::config::TimingConfig;
use crate::device::DeviceCapabilities;
use crate::model::ModelConfig;
use crate::skills::{
    build_ocr_provider, LiveObservationProvider, ObservationSource, PlaybackObservationProvider,
    RecordingObservationProvider, SkillLearningRecorder, SkillRegistry, SkillRouter,
    SkillRouterConfig, SkillRunner, SkillRunnerConfig,
};

use super::analyzer::VisionExceptionAnalyzer;
use super::config::CoordinationConfig;
use super::coordinator::Coordinator;
use super::system1::FastActionSystem;
use super::system2::SlowPlannerSystem;

/// Agent-level configuration.
#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub device_id: Option<String>,
    /// Files or directories to load skills from.
    pub skill_paths: Vec<PathBuf>,
    /// OCR backend key (`null`, `tesseract[:<lang>]`, `vision`).
    pub ocr_provider: Option<String>,
    pub include_ui_tree: bool,
    pub include_screen_hash: bool,
    /// Record every observation into this directory.
    pub record_dir: Option<PathBuf>,
    /// Replay observations from this directory instead of a live device.
    pub playback_dir: Option<PathBuf>,
    pub common_handlers_path: Option<PathBuf>,
    pub skill_whitelist: Vec<String>,
    pub risk_gate_enabled: bool,
    pub risk_keywords: Vec<String>,
    pub dry_run: bool,
    pub timing: TimingConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            skill_paths: vec![PathBuf::from("skills")],
            ocr_provider: None,
            include_ui_tree: true,
            include_screen_hash: true,
            record_dir: None,
            playback_dir: None,
            common_handlers_path: None,
            skill_whitelist: Vec::new(),
            risk_gate_enabled: false,
            risk_keywords: vec![
                "发布".to_string(),
                "上传".to_string(),
                "post".to_string(),
                "upload".to_string(),
                "publish".to_string(),
            ],
            dry_run: false,
            timing: TimingConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_skill_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.skill_paths = paths;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// The fully wired agent for one device endpoint.
pub struct PilotAgent {
    coordinator: Coordinator,
    registry: Arc<SkillRegistry>,
}

impl PilotAgent {
    /// Build an agent against the default ADB device backend.
    pub fn new(
        model_config: ModelConfig,
        config: PilotConfig,
        coordination: CoordinationConfig,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> anyhow::Result<Self> {
        let device: Arc<dyn DeviceCapabilities> = Arc::new(AdbDevice::new(
            config.device_id.clone(),
            config.timing.clone(),
        ));
        Self::with_device(
            device,
            model_config,
            config,
            coordination,
            confirmation_callback,
            takeover_callback,
        )
    }

    /// Build an agent on an explicit device handle (remote bridges, tests).
    pub fn with_device(
        device: Arc<dyn DeviceCapabilities>,
        model_config: ModelConfig,
        config: PilotConfig,
        coordination: CoordinationConfig,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> anyhow::Result<Self> {
        let mut registry = SkillRegistry::new();
        registry.load_from_paths(&config.skill_paths);
        for error in &registry.errors {
            tracing::warn!("skill load error: {}", error);
        }
        let registry = Arc::new(registry);

        let observer = Self::build_observer(&device, &model_config, &config)?;

        let runner_handler = ActionHandler::new(
            device.clone(),
            confirmation_callback.clone(),
            takeover_callback.clone(),
        );
        let runner_config = SkillRunnerConfig {
            dry_run: config.dry_run,
            common_error_handlers_path: config.common_handlers_path.clone(),
            ..SkillRunnerConfig::default()
        };
        let runner = SkillRunner::new(registry.clone(), runner_config, runner_handler, observer);

        let router_config = SkillRouterConfig {
            enforce_skill_whitelist: !config.skill_whitelist.is_empty(),
            skill_whitelist: config.skill_whitelist.clone(),
            enforce_on_risk: config.risk_gate_enabled,
            risk_keywords: config.risk_keywords.clone(),
            ..SkillRouterConfig::default()
        };
        let router = SkillRouter::new(registry.clone(), router_config);

        let system1_handler =
            ActionHandler::new(device, confirmation_callback, takeover_callback);
        let system1 = FastActionSystem::new(system1_handler, coordination.system1.clone());

        let analyzer = if coordination.system2.enable_vision_recovery {
            let analyzer_model = coordination
                .analyzer_model
                .clone()
                .unwrap_or_else(|| model_config.clone());
            Some(VisionExceptionAnalyzer::new(analyzer_model))
        } else {
            None
        };

        let system2 = SlowPlannerSystem::new(
            coordination,
            registry.clone(),
            router,
            analyzer,
            SkillLearningRecorder::from_env(),
        );

        Ok(Self {
            coordinator: Coordinator::new(system1, system2, runner),
            registry,
        })
    }

    fn build_observer(
        device: &Arc<dyn DeviceCapabilities>,
        model_config: &ModelConfig,
        config: &PilotConfig,
    ) -> anyhow::Result<Box<dyn ObservationSource>> {
        if let Some(playback_dir) = &config.playback_dir {
            let provider = PlaybackObservationProvider::new(playback_dir)
                .context("opening playback directory")?;
            return Ok(Box::new(provider));
        }

        let mut live = LiveObservationProvider::new(device.clone(), config.device_id.clone())
            .with_ui_tree(config.include_ui_tree)
            .with_screen_hash(config.include_screen_hash);
        if let Some(key) = &config.ocr_provider {
            let ocr = build_ocr_provider(key, Some(model_config.clone()))
                .context("building OCR provider")?;
            live = live.with_ocr(ocr);
        }

        if let Some(record_dir) = &config.record_dir {
            let recorder = RecordingObservationProvider::new(Box::new(live), record_dir)
                .context("opening recording directory")?;
            return Ok(Box::new(recorder));
        }
        Ok(Box::new(live))
    }

    /// Run one task to completion.
    pub async fn run(&mut self, task: &str) -> String {
        self.coordinator.run(task).await
    }

    /// Problems encountered while loading skill files.
    pub fn skill_errors(&self) -> &[String] {
        &self.registry.errors
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }
}
