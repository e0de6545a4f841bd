//! Shared test doubles for the skills and coordination layers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::device::{DeviceCapabilities, DeviceError, Screenshot};
use crate::skills::observation::{Observation, ObservationError, ObservationSource};
use crate::skills::selector::UINode;

/// Build an observation with the given screen facts and a dummy screenshot.
pub fn observation_with(
    app_name: &str,
    texts: &[&str],
    ui_nodes: Vec<UINode>,
    screen_hash: Option<&str>,
) -> Observation {
    Observation {
        screenshot: Screenshot::new(String::new(), 1080, 2400, false),
        app_name: app_name.to_string(),
        device_id: Some("test-device".to_string()),
        ui_tree: None,
        ui_nodes,
        ui_texts: texts.iter().map(|t| t.to_string()).collect(),
        screen_hash: screen_hash.map(|h| h.to_string()),
        timestamp: chrono::Utc::now(),
    }
}

/// Observation source that replays a fixed sequence, then repeats the last
/// entry forever (a stable screen).
pub struct ScriptedObservations {
    sequence: Vec<Observation>,
    index: usize,
}

impl ScriptedObservations {
    pub fn new(sequence: Vec<Observation>) -> Self {
        assert!(!sequence.is_empty(), "scripted sequence must not be empty");
        Self { sequence, index: 0 }
    }
}

#[async_trait]
impl ObservationSource for ScriptedObservations {
    async fn capture(&mut self) -> Result<Observation, ObservationError> {
        let slot = self.index.min(self.sequence.len() - 1);
        self.index += 1;
        Ok(self.sequence[slot].clone())
    }
}

/// Device double that records calls and can be told to fail.
#[derive(Default)]
pub struct MockDevice {
    pub calls: Mutex<Vec<String>>,
    /// Per-method countdown of calls that should fail before succeeding.
    pub failures: Mutex<HashMap<String, u32>>,
    /// App names `launch` should report as unknown.
    pub unknown_apps: Vec<String>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, method: &str, count: u32) {
        self.failures.lock().unwrap().insert(method.to_string(), count);
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, method: &str) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(call);
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeviceError::CommandFailed(format!("{method} failed")));
            }
        }
        Ok(())
    }
}

impl DeviceCapabilities for MockDevice {
    fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        self.record(format!("tap({x},{y})"), "tap")
    }

    fn double_tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        self.record(format!("double_tap({x},{y})"), "double_tap")
    }

    fn long_press(&self, x: u32, y: u32, _duration_ms: Option<u64>) -> Result<(), DeviceError> {
        self.record(format!("long_press({x},{y})"), "long_press")
    }

    fn swipe(
        &self,
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
        _duration_ms: Option<u64>,
    ) -> Result<(), DeviceError> {
        self.record(
            format!("swipe({start_x},{start_y}->{end_x},{end_y})"),
            "swipe",
        )
    }

    fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        self.record(format!("type({text})"), "type_text")
    }

    fn clear_text(&self) -> Result<(), DeviceError> {
        self.record("clear".to_string(), "clear_text")
    }

    fn back(&self) -> Result<(), DeviceError> {
        self.record("back".to_string(), "back")
    }

    fn home(&self) -> Result<(), DeviceError> {
        self.record("home".to_string(), "home")
    }

    fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        self.record(format!("launch({app_name})"), "launch")?;
        Ok(!self.unknown_apps.iter().any(|a| a == app_name))
    }

    fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        self.record("screenshot".to_string(), "screenshot")?;
        Ok(Screenshot::new(String::new(), 1080, 2400, false))
    }

    fn current_app(&self) -> Result<String, DeviceError> {
        self.record("current_app".to_string(), "current_app")?;
        Ok("Chrome".to_string())
    }

    fn ui_dump(&self) -> Result<Option<String>, DeviceError> {
        self.record("ui_dump".to_string(), "ui_dump")?;
        Ok(None)
    }
}
