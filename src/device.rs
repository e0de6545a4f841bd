//! Device capability interface consumed by the action and observation layers.

use thiserror::Error;

/// Upper bound of the normalized coordinate space.
///
/// Every coordinate crossing [`DeviceCapabilities`] is expressed on a
/// 0–1000 grid; the backend scales to device pixels.
pub const NORMALIZED_COORDINATE_MAX: u32 = 1000;

/// Device control errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Command execution failed: {0}")]
    CommandFailed(String),
    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),
    #[error("Device not reachable: {0}")]
    Unreachable(String),
}

/// A captured device screenshot.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
    /// Set when capture was refused (payment pages, secure input) and a
    /// fallback image was substituted.
    pub is_sensitive: bool,
}

impl Screenshot {
    pub fn new(base64_data: String, width: u32, height: u32, is_sensitive: bool) -> Self {
        Self {
            base64_data,
            width,
            height,
            is_sensitive,
        }
    }
}

/// Narrow device-control surface the engine drives.
///
/// Implementations block on the underlying transport; the engine is strictly
/// sequential per device, so there is nothing to overlap. Coordinates are
/// normalized (see [`NORMALIZED_COORDINATE_MAX`]).
pub trait DeviceCapabilities: Send + Sync {
    fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError>;
    fn double_tap(&self, x: u32, y: u32) -> Result<(), DeviceError>;
    fn long_press(&self, x: u32, y: u32, duration_ms: Option<u64>) -> Result<(), DeviceError>;
    fn swipe(
        &self,
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
        duration_ms: Option<u64>,
    ) -> Result<(), DeviceError>;
    fn type_text(&self, text: &str) -> Result<(), DeviceError>;
    fn clear_text(&self) -> Result<(), DeviceError>;
    fn back(&self) -> Result<(), DeviceError>;
    fn home(&self) -> Result<(), DeviceError>;
    /// Launch an app by display name. Ok(false) means the name is unknown.
    fn launch(&self, app_name: &str) -> Result<bool, DeviceError>;
    fn screenshot(&self) -> Result<Screenshot, DeviceError>;
    fn current_app(&self) -> Result<String, DeviceError>;
    /// Raw UI hierarchy dump, when the backend can produce one.
    fn ui_dump(&self) -> Result<Option<String>, DeviceError>;
}
