//! The ADB-backed device capability implementation.

use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::config::{get_package, TimingConfig, APP_PACKAGES};
use crate::device::{
    DeviceCapabilities, DeviceError, Screenshot, NORMALIZED_COORDINATE_MAX,
};

use super::connection::adb_prefix;
use super::input;
use super::screenshot::capture_screenshot;

/// Android device reached through `adb`.
///
/// Scales normalized 0–1000 coordinates to device pixels using the screen
/// size learned from the last screenshot (queried via `wm size` before the
/// first capture).
pub struct AdbDevice {
    device_id: Option<String>,
    timing: TimingConfig,
    screen_size: Mutex<Option<(u32, u32)>>,
}

impl AdbDevice {
    pub fn new(device_id: Option<String>, timing: TimingConfig) -> Self {
        Self {
            device_id,
            timing,
            screen_size: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn prefix(&self) -> Vec<String> {
        adb_prefix(self.device_id.as_deref())
    }

    fn shell(&self, args: &[&str]) -> Result<std::process::Output, DeviceError> {
        let prefix = self.prefix();
        Command::new(&prefix[0])
            .args(&prefix[1..])
            .args(args)
            .output()
            .map_err(|e| DeviceError::CommandFailed(e.to_string()))
    }

    fn settle(&self) {
        thread::sleep(self.timing.action_settle());
    }

    /// Screen size in pixels, querying `wm size` on first use.
    fn screen_size(&self) -> (u32, u32) {
        let mut cached = self.screen_size.lock().unwrap();
        if let Some(size) = *cached {
            return size;
        }
        let size = self.query_screen_size().unwrap_or((1080, 2400));
        *cached = Some(size);
        size
    }

    fn query_screen_size(&self) -> Option<(u32, u32)> {
        let output = self.shell(&["shell", "wm", "size"]).ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // "Physical size: 1080x2400"
        let dims = stdout.split(':').nth(1)?.trim();
        let (width, height) = dims.split_once('x')?;
        Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
    }

    fn to_pixels(&self, x: u32, y: u32) -> (i64, i64) {
        let (width, height) = self.screen_size();
        let max = NORMALIZED_COORDINATE_MAX as i64;
        (
            (x as i64 * width as i64) / max,
            (y as i64 * height as i64) / max,
        )
    }
}

impl DeviceCapabilities for AdbDevice {
    fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        let (px, py) = self.to_pixels(x, y);
        self.shell(&["shell", "input", "tap", &px.to_string(), &py.to_string()])?;
        self.settle();
        Ok(())
    }

    fn double_tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        let (px, py) = self.to_pixels(x, y);
        let (px, py) = (px.to_string(), py.to_string());
        self.shell(&["shell", "input", "tap", &px, &py])?;
        thread::sleep(Duration::from_millis(self.timing.double_tap_interval_ms));
        self.shell(&["shell", "input", "tap", &px, &py])?;
        self.settle();
        Ok(())
    }

    fn long_press(&self, x: u32, y: u32, duration_ms: Option<u64>) -> Result<(), DeviceError> {
        let (px, py) = self.to_pixels(x, y);
        let (px, py) = (px.to_string(), py.to_string());
        let duration = duration_ms
            .unwrap_or(self.timing.long_press_duration_ms)
            .to_string();
        // A zero-distance swipe is how `input` expresses a long press.
        self.shell(&["shell", "input", "swipe", &px, &py, &px, &py, &duration])?;
        self.settle();
        Ok(())
    }

    fn swipe(
        &self,
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
        duration_ms: Option<u64>,
    ) -> Result<(), DeviceError> {
        let (sx, sy) = self.to_pixels(start_x, start_y);
        let (ex, ey) = self.to_pixels(end_x, end_y);
        let duration = duration_ms.unwrap_or_else(|| {
            let dist_sq = ((sx - ex).pow(2) + (sy - ey).pow(2)) as u64;
            (dist_sq / 1000).clamp(1000, 2000)
        });
        self.shell(&[
            "shell",
            "input",
            "swipe",
            &sx.to_string(),
            &sy.to_string(),
            &ex.to_string(),
            &ey.to_string(),
            &duration.to_string(),
        ])?;
        self.settle();
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        input::type_with_keyboard(&self.prefix(), text, &self.timing)
    }

    fn clear_text(&self) -> Result<(), DeviceError> {
        input::clear_field(&self.prefix())?;
        thread::sleep(Duration::from_millis(self.timing.text_clear_ms));
        Ok(())
    }

    fn back(&self) -> Result<(), DeviceError> {
        self.shell(&["shell", "input", "keyevent", "4"])?;
        self.settle();
        Ok(())
    }

    fn home(&self) -> Result<(), DeviceError> {
        self.shell(&["shell", "input", "keyevent", "KEYCODE_HOME"])?;
        self.settle();
        Ok(())
    }

    fn launch(&self, app_name: &str) -> Result<bool, DeviceError> {
        let Some(package) = get_package(app_name) else {
            return Ok(false);
        };
        self.shell(&[
            "shell",
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])?;
        self.settle();
        Ok(true)
    }

    fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        let screenshot = capture_screenshot(&self.prefix());
        // Keep coordinate scaling in step with what the screen reports.
        if screenshot.width > 0 && screenshot.height > 0 {
            *self.screen_size.lock().unwrap() = Some((screenshot.width, screenshot.height));
        }
        Ok(screenshot)
    }

    fn current_app(&self) -> Result<String, DeviceError> {
        let output = self.shell(&["shell", "dumpsys", "window"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if !line.contains("mCurrentFocus") && !line.contains("mFocusedApp") {
                continue;
            }
            for (app_name, package) in APP_PACKAGES.iter() {
                if line.contains(*package) {
                    return Ok(app_name.to_string());
                }
            }
        }
        Ok("System Home".to_string())
    }

    fn ui_dump(&self) -> Result<Option<String>, DeviceError> {
        let output = self.shell(&["exec-out", "uiautomator", "dump", "/dev/tty"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // The dump is followed by a status line; cut from the XML prologue
        // to the closing hierarchy tag.
        let start = match stdout.find("<?xml").or_else(|| stdout.find("<hierarchy")) {
            Some(start) => start,
            None => return Ok(None),
        };
        let end = match stdout.rfind("</hierarchy>") {
            Some(end) => end + "</hierarchy>".len(),
            None => return Ok(None),
        };
        Ok(Some(stdout[start..end].to_string()))
    }
}
