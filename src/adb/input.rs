//! Text input over ADB using the ADB Keyboard IME.
//!
//! Requires ADB Keyboard on the device
//! (https://github.com/nicnocquee/AdbKeyboard): text goes through a
//! base64 broadcast so non-ASCII input survives the shell.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::device::DeviceError;

const ADB_IME: &str = "com.android.adbkeyboard/.AdbIME";

fn run(prefix: &[String], args: &[&str]) -> Result<std::process::Output, DeviceError> {
    Command::new(&prefix[0])
        .args(&prefix[1..])
        .args(args)
        .output()
        .map_err(|e| DeviceError::CommandFailed(e.to_string()))
}

/// Send text to the focused field through the ADB Keyboard broadcast.
pub(crate) fn send_text(prefix: &[String], text: &str) -> Result<(), DeviceError> {
    let encoded = STANDARD.encode(text.as_bytes());
    run(
        prefix,
        &[
            "shell", "am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded,
        ],
    )?;
    Ok(())
}

/// Clear the focused input field.
pub(crate) fn clear_field(prefix: &[String]) -> Result<(), DeviceError> {
    run(prefix, &["shell", "am", "broadcast", "-a", "ADB_CLEAR_TEXT"])?;
    Ok(())
}

/// Current default IME identifier.
fn current_ime(prefix: &[String]) -> String {
    match run(
        prefix,
        &["shell", "settings", "get", "secure", "default_input_method"],
    ) {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        Err(_) => String::new(),
    }
}

/// Type text with the full keyboard dance: switch to the ADB keyboard, send
/// the text, restore the original IME. Delays come from the timing config.
pub(crate) fn type_with_keyboard(
    prefix: &[String],
    text: &str,
    timing: &TimingConfig,
) -> Result<(), DeviceError> {
    let original = current_ime(prefix);
    if !original.contains(ADB_IME) {
        run(prefix, &["shell", "ime", "set", ADB_IME])?;
    }
    thread::sleep(Duration::from_millis(timing.keyboard_switch_ms));

    send_text(prefix, text)?;
    thread::sleep(Duration::from_millis(timing.text_input_ms));

    if !original.is_empty() && !original.contains(ADB_IME) {
        run(prefix, &["shell", "ime", "set", &original])?;
        thread::sleep(Duration::from_millis(timing.keyboard_restore_ms));
    }
    Ok(())
}
