//! Timing delays for device interaction.
//!
//! An explicit value passed into the constructors that need it; there is no
//! process-wide mutable timing state. Defaults can be overridden via
//! `PHONE_PILOT_*` environment variables at construction time.

use std::env;
use std::time::Duration;

/// Delays (in milliseconds) applied around device operations.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Settle delay after tap/double-tap/long-press/swipe/back/home/launch.
    pub action_settle_ms: u64,
    /// Gap between the two taps of a double tap.
    pub double_tap_interval_ms: u64,
    /// Default long-press hold duration.
    pub long_press_duration_ms: u64,
    /// Delay after switching to the ADB keyboard.
    pub keyboard_switch_ms: u64,
    /// Delay after clearing the text field.
    pub text_clear_ms: u64,
    /// Delay after committing typed text.
    pub text_input_ms: u64,
    /// Delay after restoring the original keyboard.
    pub keyboard_restore_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            action_settle_ms: 1000,
            double_tap_interval_ms: 100,
            long_press_duration_ms: 3000,
            keyboard_switch_ms: 1000,
            text_clear_ms: 1000,
            text_input_ms: 1000,
            keyboard_restore_ms: 1000,
        }
    }
}

impl TimingConfig {
    /// Defaults with `PHONE_PILOT_*` environment overrides applied once.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            action_settle_ms: env_ms("PHONE_PILOT_ACTION_SETTLE_MS", defaults.action_settle_ms),
            double_tap_interval_ms: env_ms(
                "PHONE_PILOT_DOUBLE_TAP_INTERVAL_MS",
                defaults.double_tap_interval_ms,
            ),
            long_press_duration_ms: env_ms(
                "PHONE_PILOT_LONG_PRESS_DURATION_MS",
                defaults.long_press_duration_ms,
            ),
            keyboard_switch_ms: env_ms(
                "PHONE_PILOT_KEYBOARD_SWITCH_MS",
                defaults.keyboard_switch_ms,
            ),
            text_clear_ms: env_ms("PHONE_PILOT_TEXT_CLEAR_MS", defaults.text_clear_ms),
            text_input_ms: env_ms("PHONE_PILOT_TEXT_INPUT_MS", defaults.text_input_ms),
            keyboard_restore_ms: env_ms(
                "PHONE_PILOT_KEYBOARD_RESTORE_MS",
                defaults.keyboard_restore_ms,
            ),
        }
    }

    /// A no-delay config for tests and dry runs.
    pub fn instant() -> Self {
        Self {
            action_settle_ms: 0,
            double_tap_interval_ms: 0,
            long_press_duration_ms: 0,
            keyboard_switch_ms: 0,
            text_clear_ms: 0,
            text_input_ms: 0,
            keyboard_restore_ms: 0,
        }
    }

    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }
}

fn env_ms(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.action_settle_ms, 1000);
        assert_eq!(timing.double_tap_interval_ms, 100);
    }

    #[test]
    fn test_instant_is_zero() {
        let timing = TimingConfig::instant();
        assert_eq!(timing.action_settle(), Duration::ZERO);
        assert_eq!(timing.text_input_ms, 0);
    }
}
