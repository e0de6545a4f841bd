//! Observation capture: live, recording, and playback providers.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::device::{DeviceCapabilities, DeviceError, Screenshot};
use crate::skills::ocr::OcrProvider;
use crate::skills::selector::{extract_texts, parse_ui_dump, UINode};
use crate::skills::utils::{compute_ahash, decode_image_from_base64};

/// Hash size used for the screen fingerprint (8x8 bits -> 16 hex chars).
const AHASH_SIZE: u32 = 8;

#[derive(Error, Debug)]
pub enum ObservationError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Playback observations exhausted after {0} captures")]
    PlaybackExhausted(usize),
    #[error("No recorded observations found in {0}")]
    EmptyPlaybackDir(String),
    #[error("Recording failed: {0}")]
    Recording(String),
    #[error("Bad observation record {0}: {1}")]
    BadRecord(String, String),
}

/// A point-in-time snapshot of device/screen state.
///
/// Captured fresh before every guard/assert/step/route evaluation and never
/// mutated afterward, only replaced by the next capture.
#[derive(Debug, Clone)]
pub struct Observation {
    pub screenshot: Screenshot,
    pub app_name: String,
    pub device_id: Option<String>,
    pub ui_tree: Option<String>,
    pub ui_nodes: Vec<UINode>,
    pub ui_texts: Vec<String>,
    pub screen_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn width(&self) -> u32 {
        self.screenshot.width
    }

    pub fn height(&self) -> u32 {
        self.screenshot.height
    }
}

/// Source of observations; implementations may capture live, record as they
/// capture, or replay a recording.
#[async_trait]
pub trait ObservationSource: Send {
    async fn capture(&mut self) -> Result<Observation, ObservationError>;
}

/// Captures live state from a device.
pub struct LiveObservationProvider {
    device: Arc<dyn DeviceCapabilities>,
    device_id: Option<String>,
    include_ui_tree: bool,
    include_screen_hash: bool,
    ocr: Option<Arc<dyn OcrProvider>>,
}

impl LiveObservationProvider {
    pub fn new(device: Arc<dyn DeviceCapabilities>, device_id: Option<String>) -> Self {
        Self {
            device,
            device_id,
            include_ui_tree: true,
            include_screen_hash: true,
            ocr: None,
        }
    }

    pub fn with_ui_tree(mut self, include: bool) -> Self {
        self.include_ui_tree = include;
        self
    }

    pub fn with_screen_hash(mut self, include: bool) -> Self {
        self.include_screen_hash = include;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }
}

#[async_trait]
impl ObservationSource for LiveObservationProvider {
    async fn capture(&mut self) -> Result<Observation, ObservationError> {
        let screenshot = self.device.screenshot()?;
        let app_name = self.device.current_app().unwrap_or_else(|e| {
            tracing::warn!("current app lookup failed: {}", e);
            "Unknown".to_string()
        });

        let mut ui_tree = None;
        let mut ui_nodes = Vec::new();
        if self.include_ui_tree {
            match self.device.ui_dump() {
                Ok(Some(dump)) => {
                    ui_nodes = parse_ui_dump(&dump);
                    ui_tree = Some(dump);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("ui dump unavailable: {}", e),
            }
        }

        let image = decode_image_from_base64(&screenshot.base64_data);

        if let (Some(ocr), Some(image)) = (&self.ocr, &image) {
            match ocr.extract(image).await {
                Ok(results) => {
                    for result in results {
                        ui_nodes.push(UINode {
                            text: result.text,
                            resource_id: String::new(),
                            content_desc: String::new(),
                            class_name: "ocr".to_string(),
                            clickable: false,
                            bounds: result.bounds,
                        });
                    }
                }
                Err(e) => tracing::warn!("ocr extraction failed: {}", e),
            }
        }

        let ui_texts = extract_texts(&ui_nodes);
        let screen_hash = if self.include_screen_hash {
            image.as_ref().map(|img| compute_ahash(img, AHASH_SIZE))
        } else {
            None
        };

        Ok(Observation {
            screenshot,
            app_name,
            device_id: self.device_id.clone(),
            ui_tree,
            ui_nodes,
            ui_texts,
            screen_hash,
            timestamp: Utc::now(),
        })
    }
}

/// Wraps another source and writes every capture to disk.
///
/// Each observation becomes `obs_NNNN.png` + `obs_NNNN.json` (and
/// `obs_NNNN.xml` when a UI tree was captured), numbered in capture order.
pub struct RecordingObservationProvider {
    inner: Box<dyn ObservationSource>,
    record_dir: PathBuf,
    index: usize,
}

impl RecordingObservationProvider {
    pub fn new(
        inner: Box<dyn ObservationSource>,
        record_dir: impl Into<PathBuf>,
    ) -> Result<Self, ObservationError> {
        let record_dir = record_dir.into();
        std::fs::create_dir_all(&record_dir)
            .map_err(|e| ObservationError::Recording(e.to_string()))?;
        Ok(Self {
            inner,
            record_dir,
            index: 0,
        })
    }

    fn save(&self, observation: &Observation, index: usize) -> Result<(), ObservationError> {
        let stem = format!("obs_{:04}", index);

        let mut screenshot_file = None;
        if let Some(image) = decode_image_from_base64(&observation.screenshot.base64_data) {
            let path = self.record_dir.join(format!("{stem}.png"));
            if image.save(&path).is_ok() {
                screenshot_file = Some(format!("{stem}.png"));
            }
        }

        let mut ui_tree_file = None;
        if let Some(tree) = &observation.ui_tree {
            let path = self.record_dir.join(format!("{stem}.xml"));
            if std::fs::write(&path, tree).is_ok() {
                ui_tree_file = Some(format!("{stem}.xml"));
            }
        }

        let meta = json!({
            "app_name": observation.app_name,
            "device_id": observation.device_id,
            "timestamp": observation.timestamp.to_rfc3339(),
            "screen_hash": observation.screen_hash,
            "width": observation.width(),
            "height": observation.height(),
            "is_sensitive": observation.screenshot.is_sensitive,
            "screenshot_file": screenshot_file,
            "ui_tree_file": ui_tree_file,
        });
        std::fs::write(
            self.record_dir.join(format!("{stem}.json")),
            serde_json::to_string_pretty(&meta).unwrap_or_default(),
        )
        .map_err(|e| ObservationError::Recording(e.to_string()))
    }
}

#[async_trait]
impl ObservationSource for RecordingObservationProvider {
    async fn capture(&mut self) -> Result<Observation, ObservationError> {
        let observation = self.inner.capture().await?;
        self.index += 1;
        if let Err(e) = self.save(&observation, self.index) {
            tracing::warn!("failed to record observation {}: {}", self.index, e);
        }
        Ok(observation)
    }
}

/// Replays a recorded observation sequence in file order.
pub struct PlaybackObservationProvider {
    playback_dir: PathBuf,
    records: Vec<PathBuf>,
    index: usize,
}

impl PlaybackObservationProvider {
    pub fn new(playback_dir: impl Into<PathBuf>) -> Result<Self, ObservationError> {
        let playback_dir = playback_dir.into();
        let mut records: Vec<PathBuf> = std::fs::read_dir(&playback_dir)
            .map_err(|e| ObservationError::BadRecord(playback_dir.display().to_string(), e.to_string()))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("obs_") && name.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        records.sort();
        if records.is_empty() {
            return Err(ObservationError::EmptyPlaybackDir(
                playback_dir.display().to_string(),
            ));
        }
        Ok(Self {
            playback_dir,
            records,
            index: 0,
        })
    }

    fn load(&self, path: &PathBuf) -> Result<Observation, ObservationError> {
        let name = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ObservationError::BadRecord(name.clone(), e.to_string()))?;
        let meta: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ObservationError::BadRecord(name.clone(), e.to_string()))?;

        let mut base64_data = String::new();
        if let Some(file) = meta.get("screenshot_file").and_then(|v| v.as_str()) {
            if let Ok(bytes) = std::fs::read(self.playback_dir.join(file)) {
                base64_data = STANDARD.encode(bytes);
            }
        }

        let mut ui_tree = None;
        let mut ui_nodes = Vec::new();
        if let Some(file) = meta.get("ui_tree_file").and_then(|v| v.as_str()) {
            if let Ok(tree) = std::fs::read_to_string(self.playback_dir.join(file)) {
                ui_nodes = parse_ui_dump(&tree);
                ui_tree = Some(tree);
            }
        }
        let ui_texts = extract_texts(&ui_nodes);

        let timestamp = meta
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Observation {
            screenshot: Screenshot::new(
                base64_data,
                meta.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                meta.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                meta.get("is_sensitive").and_then(|v| v.as_bool()).unwrap_or(false),
            ),
            app_name: meta
                .get("app_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            device_id: meta
                .get("device_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            ui_tree,
            ui_nodes,
            ui_texts,
            screen_hash: meta
                .get("screen_hash")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            timestamp,
        })
    }
}

#[async_trait]
impl ObservationSource for PlaybackObservationProvider {
    async fn capture(&mut self) -> Result<Observation, ObservationError> {
        if self.index >= self.records.len() {
            return Err(ObservationError::PlaybackExhausted(self.records.len()));
        }
        let record = self.records[self.index].clone();
        self.index += 1;
        self.load(&record)
    }
}
