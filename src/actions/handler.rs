//! Action dispatch: turns engine action values into device calls.

use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::device::{DeviceCapabilities, DeviceError, NORMALIZED_COORDINATE_MAX};

/// Action dispatch errors. Transport failures surface here; malformed
/// actions come back as failed [`ActionResult`]s instead.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Device call failed: {0}")]
    Device(#[from] DeviceError),
}

/// Result of an action execution.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
    pub requires_confirmation: bool,
}

impl ActionResult {
    /// Create a successful result.
    pub fn success() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
            requires_confirmation: false,
        }
    }

    /// Create a failure result.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
            requires_confirmation: false,
        }
    }
}

/// Callback type for confirmation requests.
pub type ConfirmationCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Callback type for takeover requests.
pub type TakeoverCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Executes engine actions (`{"_metadata": "do", "action": …}`) against a
/// device handle.
///
/// Coordinates in actions are normalized 0–1000; the device backend scales
/// them to pixels.
pub struct ActionHandler {
    device: Arc<dyn DeviceCapabilities>,
    confirmation_callback: ConfirmationCallback,
    takeover_callback: TakeoverCallback,
}

impl ActionHandler {
    /// Create a handler; callbacks default to console prompts.
    pub fn new(
        device: Arc<dyn DeviceCapabilities>,
        confirmation_callback: Option<ConfirmationCallback>,
        takeover_callback: Option<TakeoverCallback>,
    ) -> Self {
        Self {
            device,
            confirmation_callback: confirmation_callback
                .unwrap_or_else(|| Arc::new(default_confirmation)),
            takeover_callback: takeover_callback.unwrap_or_else(|| Arc::new(default_takeover)),
        }
    }

    pub fn device(&self) -> &Arc<dyn DeviceCapabilities> {
        &self.device
    }

    /// Execute an action value.
    ///
    /// `Err` means the device transport failed mid-action; a malformed or
    /// refused action is an `Ok` carrying a failed result.
    pub fn execute(&self, action: &Value) -> Result<ActionResult, ActionError> {
        let action_type = action
            .get("_metadata")
            .and_then(Value::as_str)
            .unwrap_or("");
        if action_type != "do" {
            return Ok(ActionResult::failure(format!(
                "Unknown action type: {}",
                action_type
            )));
        }
        let action_name = action.get("action").and_then(Value::as_str).unwrap_or("");
        match action_name {
            "Launch" => self.handle_launch(action),
            "Tap" => self.handle_point_action(action, PointAction::Tap),
            "Double Tap" => self.handle_point_action(action, PointAction::DoubleTap),
            "Long Press" => self.handle_point_action(action, PointAction::LongPress),
            "Type" | "Type_Name" => self.handle_type(action),
            "Swipe" => self.handle_swipe(action),
            "Back" => {
                self.device.back()?;
                Ok(ActionResult::success())
            }
            "Home" => {
                self.device.home()?;
                Ok(ActionResult::success())
            }
            "Wait" => Ok(self.handle_wait(action)),
            "Take_over" => Ok(self.handle_takeover(action)),
            "Note" | "Call_API" => Ok(ActionResult::success()),
            "Interact" => Ok(ActionResult {
                success: true,
                should_finish: false,
                message: Some("User interaction required".to_string()),
                requires_confirmation: false,
            }),
            other => Ok(ActionResult::failure(format!("Unknown action: {}", other))),
        }
    }

    fn handle_launch(&self, action: &Value) -> Result<ActionResult, ActionError> {
        let Some(app_name) = action.get("app").and_then(Value::as_str) else {
            return Ok(ActionResult::failure("No app name specified"));
        };
        if self.device.launch(app_name)? {
            Ok(ActionResult::success())
        } else {
            Ok(ActionResult::failure(format!("App not found: {}", app_name)))
        }
    }

    fn handle_point_action(
        &self,
        action: &Value,
        kind: PointAction,
    ) -> Result<ActionResult, ActionError> {
        let (x, y) = match read_point(action, "element") {
            Ok(point) => point,
            Err(message) => return Ok(ActionResult::failure(message)),
        };

        // A declared message marks a sensitive operation needing sign-off.
        if let Some(message) = action.get("message").and_then(Value::as_str) {
            if !(self.confirmation_callback)(message) {
                return Ok(ActionResult {
                    success: false,
                    should_finish: true,
                    message: Some("User cancelled sensitive operation".to_string()),
                    requires_confirmation: true,
                });
            }
        }

        match kind {
            PointAction::Tap => self.device.tap(x, y)?,
            PointAction::DoubleTap => self.device.double_tap(x, y)?,
            PointAction::LongPress => {
                let duration_ms = action.get("duration_ms").and_then(Value::as_u64);
                self.device.long_press(x, y, duration_ms)?;
            }
        }
        Ok(ActionResult::success())
    }

    fn handle_type(&self, action: &Value) -> Result<ActionResult, ActionError> {
        let text = action.get("text").and_then(Value::as_str).unwrap_or("");
        self.device.clear_text()?;
        self.device.type_text(text)?;
        Ok(ActionResult::success())
    }

    fn handle_swipe(&self, action: &Value) -> Result<ActionResult, ActionError> {
        let (start_x, start_y) = match read_point(action, "start") {
            Ok(point) => point,
            Err(message) => return Ok(ActionResult::failure(message)),
        };
        let (end_x, end_y) = match read_point(action, "end") {
            Ok(point) => point,
            Err(message) => return Ok(ActionResult::failure(message)),
        };
        let duration_ms = action.get("duration_ms").and_then(Value::as_u64);
        self.device
            .swipe(start_x, start_y, end_x, end_y, duration_ms)?;
        Ok(ActionResult::success())
    }

    fn handle_wait(&self, action: &Value) -> ActionResult {
        let duration_str = action
            .get("duration")
            .and_then(Value::as_str)
            .unwrap_or("1 seconds");
        let duration: f64 = duration_str
            .replace("seconds", "")
            .trim()
            .parse()
            .unwrap_or(1.0);
        thread::sleep(Duration::from_secs_f64(duration.max(0.0)));
        ActionResult::success()
    }

    fn handle_takeover(&self, action: &Value) -> ActionResult {
        let message = action
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("User intervention required");
        (self.takeover_callback)(message);
        ActionResult::success()
    }
}

enum PointAction {
    Tap,
    DoubleTap,
    LongPress,
}

/// Read a normalized [x, y] pair from an action field.
fn read_point(action: &Value, key: &str) -> Result<(u32, u32), String> {
    let coords: Vec<i64> = action
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    if coords.len() < 2 {
        return Err(format!("Missing {} coordinates", key));
    }
    let max = NORMALIZED_COORDINATE_MAX as i64;
    for (axis, value) in [("X", coords[0]), ("Y", coords[1])] {
        if value < 0 || value > max {
            return Err(format!(
                "{} coordinate {} for '{}' is out of bounds. Valid range is [0, {}].",
                axis, value, key, max
            ));
        }
    }
    Ok((coords[0] as u32, coords[1] as u32))
}

/// Default confirmation callback using console input.
fn default_confirmation(message: &str) -> bool {
    print!("Sensitive operation: {}\nConfirm? (Y/N): ", message);
    let _ = io::stdout().flush();

    let stdin = io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);
    line.trim().eq_ignore_ascii_case("y")
}

/// Default takeover callback using console input.
fn default_takeover(message: &str) {
    print!(
        "{}\nPress Enter after completing manual operation...",
        message
    );
    let _ = io::stdout().flush();

    let stdin = io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);
}
