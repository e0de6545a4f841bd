//! Screen capture over ADB.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, RgbImage};
use std::io::Cursor;
use std::process::Command;

use crate::device::Screenshot;

/// Capture a screenshot via `adb exec-out screencap -p`.
///
/// Streaming to stdout avoids disk I/O on both the device and host. When
/// capture is refused (sensitive screens like payment pages) or the data is
/// not a PNG, a black fallback image is returned instead of an error so the
/// engine keeps a consistent view of the screen.
pub(crate) fn capture_screenshot(prefix: &[String]) -> Screenshot {
    let result = Command::new(&prefix[0])
        .args(&prefix[1..])
        .args(["exec-out", "screencap", "-p"])
        .output();

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("screenshot command failed: {}", e);
            return fallback_screenshot(false);
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("Status: -1") || stderr.contains("Failed") || stderr.contains("error") {
        tracing::warn!("screenshot refused (sensitive screen?): {}", stderr.trim());
        return fallback_screenshot(true);
    }

    let png_data = &output.stdout;
    if png_data.len() < 8 || &png_data[0..8] != b"\x89PNG\r\n\x1a\n" {
        tracing::error!("screenshot produced no valid PNG ({} bytes)", png_data.len());
        return fallback_screenshot(false);
    }

    match image::load_from_memory(png_data) {
        Ok(img) => Screenshot::new(STANDARD.encode(png_data), img.width(), img.height(), false),
        Err(e) => {
            tracing::error!("failed to parse screenshot image: {}", e);
            fallback_screenshot(false)
        }
    }
}

/// Black stand-in image for failed captures.
pub(crate) fn fallback_screenshot(is_sensitive: bool) -> Screenshot {
    let default_width: u32 = 1080;
    let default_height: u32 = 2400;

    let black = RgbImage::from_fn(default_width, default_height, |_, _| image::Rgb([0, 0, 0]));
    let mut buffer = Cursor::new(Vec::new());
    let _ = DynamicImage::ImageRgb8(black).write_to(&mut buffer, image::ImageFormat::Png);

    Screenshot::new(
        STANDARD.encode(buffer.into_inner()),
        default_width,
        default_height,
        is_sensitive,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_screenshot() {
        let screenshot = fallback_screenshot(true);
        assert_eq!(screenshot.width, 1080);
        assert_eq!(screenshot.height, 2400);
        assert!(screenshot.is_sensitive);
        assert!(!screenshot.base64_data.is_empty());
    }
}
