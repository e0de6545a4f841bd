//! Template expansion, perceptual hashing and backoff helpers.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::DynamicImage;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap());
static WHOLE_TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{\{(\w+)\}\}$").unwrap());

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Hash length mismatch: {0} vs {1}")]
    LengthMismatch(usize, usize),
    #[error("Invalid hex digit in hash")]
    InvalidHex,
}

/// Substitute `{{name}}` placeholders in a string with variable values.
/// Unknown placeholders are left as-is.
pub fn render_string(value: &str, variables: &Map<String, Value>) -> String {
    TEMPLATE_RE
        .replace_all(value, |caps: &regex::Captures| {
            match variables.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Recursively expand templates through a spec tree.
///
/// A string that is exactly one placeholder resolves to the variable's JSON
/// value of any type, so a `{{coords}}` target can become a list.
pub fn render_templates(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = WHOLE_TEMPLATE_RE.captures(s.trim()) {
                if let Some(replacement) = variables.get(&caps[1]) {
                    return replacement.clone();
                }
            }
            Value::String(render_string(s, variables))
        }
        Value::Array(items) => Value::Array(
            items.iter().map(|item| render_templates(item, variables)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| (key.clone(), render_templates(val, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Decode a base64-encoded image (PNG or JPEG payload).
pub fn decode_image_from_base64(base64_data: &str) -> Option<DynamicImage> {
    let raw = STANDARD.decode(base64_data).ok()?;
    image::load_from_memory(&raw).ok()
}

/// Compute the average hash (aHash) of an image as a hex string.
///
/// The image is grayscaled, downsampled to `hash_size` x `hash_size`, and
/// each pixel contributes one bit: 1 when at or above the mean intensity.
pub fn compute_ahash(image: &DynamicImage, hash_size: u32) -> String {
    let gray = image
        .resize_exact(hash_size, hash_size, image::imageops::FilterType::Triangle)
        .to_luma8();
    let pixels: Vec<u64> = gray.pixels().map(|p| p.0[0] as u64).collect();
    let avg = pixels.iter().sum::<u64>() as f64 / pixels.len() as f64;

    let mut hex = String::with_capacity(pixels.len() / 4);
    let mut nibble = 0u8;
    for (i, px) in pixels.iter().enumerate() {
        nibble <<= 1;
        if *px as f64 >= avg {
            nibble |= 1;
        }
        if i % 4 == 3 {
            hex.push(char::from_digit(nibble as u32, 16).unwrap());
            nibble = 0;
        }
    }
    hex
}

/// Hamming distance between two equal-length hex hash strings.
pub fn hamming_distance(hash_a: &str, hash_b: &str) -> Result<u32, HashError> {
    if hash_a.len() != hash_b.len() {
        return Err(HashError::LengthMismatch(hash_a.len(), hash_b.len()));
    }
    let mut distance = 0u32;
    for (a, b) in hash_a.chars().zip(hash_b.chars()) {
        let a = a.to_digit(16).ok_or(HashError::InvalidHex)?;
        let b = b.to_digit(16).ok_or(HashError::InvalidHex)?;
        distance += (a ^ b).count_ones();
    }
    Ok(distance)
}

/// Compute the backoff delay for a retry attempt (1-based).
///
/// Exponential growth from `base_ms`, random jitter added, and the result
/// clamped so it never exceeds the effective cap (`max_ms`, or `base_ms`
/// when no cap is configured).
pub fn backoff_delay_ms<R: Rng>(
    attempt: u32,
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
    jitter_ms: u64,
    rng: &mut R,
) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let cap = if max_ms > 0 { max_ms } else { base_ms };
    let exponent = attempt.saturating_sub(1);
    let scaled = base_ms as f64 * multiplier.max(0.0).powi(exponent as i32);
    let mut delay = scaled.min(cap as f64) as u64;
    if jitter_ms > 0 {
        delay = delay.saturating_add(rng.gen_range(0..=jitter_ms));
    }
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        json!({
            "user": "alice",
            "count": 3,
            "coords": [120, 840],
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_render_string() {
        assert_eq!(render_string("hello {{user}}", &vars()), "hello alice");
        assert_eq!(render_string("{{count}} items", &vars()), "3 items");
        assert_eq!(render_string("{{missing}}!", &vars()), "{{missing}}!");
    }

    #[test]
    fn test_whole_placeholder_resolves_to_value() {
        let rendered = render_templates(&json!({"target": "{{coords}}"}), &vars());
        assert_eq!(rendered["target"], json!([120, 840]));
    }

    #[test]
    fn test_render_templates_nested() {
        let spec = json!({
            "steps": [{"action": "Type", "text": "hi {{user}}"}],
        });
        let rendered = render_templates(&spec, &vars());
        assert_eq!(rendered["steps"][0]["text"], "hi alice");
    }

    #[test]
    fn test_hamming_distance_symmetric_and_zero() {
        assert_eq!(hamming_distance("ff00", "ff00").unwrap(), 0);
        let ab = hamming_distance("ff00", "f001").unwrap();
        let ba = hamming_distance("f001", "ff00").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, 5);
        assert!(hamming_distance("ff", "fff").is_err());
    }

    #[test]
    fn test_ahash_identical_images() {
        let img = DynamicImage::new_rgb8(32, 32);
        let a = compute_ahash(&img, 8);
        let b = compute_ahash(&img, 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_ahash_noise_stays_close() {
        let mut base = image::RgbImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        });
        let hash_a = compute_ahash(&DynamicImage::ImageRgb8(base.clone()), 8);
        // Flip a handful of pixels, well below the downsample resolution.
        for i in 0..4 {
            base.put_pixel(i, 0, image::Rgb([200, 200, 200]));
        }
        let hash_b = compute_ahash(&DynamicImage::ImageRgb8(base), 8);
        assert!(hamming_distance(&hash_a, &hash_b).unwrap() <= 4);
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..12 {
            let delay = backoff_delay_ms(attempt, 100, 2.0, 1500, 300, &mut rng);
            assert!(delay <= 1500, "attempt {attempt} delay {delay}");
        }
    }

    #[test]
    fn test_backoff_zero_base_is_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(backoff_delay_ms(3, 0, 2.0, 1000, 50, &mut rng), 0);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let mut rng = StdRng::seed_from_u64(7);
        let first = backoff_delay_ms(1, 100, 2.0, 10_000, 0, &mut rng);
        let third = backoff_delay_ms(3, 100, 2.0, 10_000, 0, &mut rng);
        assert_eq!(first, 100);
        assert_eq!(third, 400);
    }
}
