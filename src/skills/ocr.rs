//! OCR text-extraction backends behind one narrow interface.
//!
//! The backend is selected by a runtime configuration key; see
//! [`build_ocr_provider`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::DynamicImage;
use serde_json::Value;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::model::{extract_json_object, MessageBuilder, ModelClient, ModelConfig};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR backend failed: {0}")]
    BackendFailed(String),
    #[error("Unsupported OCR provider: {0}")]
    UnsupportedProvider(String),
    #[error("OCR provider '{0}' requires a model configuration")]
    MissingModelConfig(String),
}

/// One recognized text fragment with its bounding box in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub bounds: (i32, i32, i32, i32),
    pub confidence: Option<f32>,
}

/// Text extraction capability.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn extract(&self, image: &DynamicImage) -> Result<Vec<OcrResult>, OcrError>;
}

/// Backend that recognizes nothing; conditions over screen text then
/// evaluate to unknown instead of false.
pub struct NullOcr;

#[async_trait]
impl OcrProvider for NullOcr {
    async fn extract(&self, _image: &DynamicImage) -> Result<Vec<OcrResult>, OcrError> {
        Ok(Vec::new())
    }
}

/// Shells out to the `tesseract` binary (TSV output over stdin/stdout).
pub struct TesseractOcr {
    lang: String,
}

impl TesseractOcr {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }

    fn run_tesseract(&self, png: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new("tesseract")
            .args(["stdin", "stdout", "-l", &self.lang, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OcrError::BackendFailed(e.to_string()))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(png)
                .map_err(|e| OcrError::BackendFailed(e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::BackendFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(OcrError::BackendFailed(format!(
                "tesseract exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrProvider for TesseractOcr {
    async fn extract(&self, image: &DynamicImage) -> Result<Vec<OcrResult>, OcrError> {
        let png = encode_png(image)?;
        let tsv = self.run_tesseract(&png)?;
        Ok(parse_tesseract_tsv(&tsv))
    }
}

/// TSV columns: level page block par line word left top width height conf text.
fn parse_tesseract_tsv(tsv: &str) -> Vec<OcrResult> {
    let mut results = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let parse = |i: usize| cols[i].parse::<i32>().unwrap_or(0);
        let (left, top, width, height) = (parse(6), parse(7), parse(8), parse(9));
        let confidence = cols[10]
            .parse::<f32>()
            .ok()
            .filter(|c| *c >= 0.0)
            .map(|c| c / 100.0);
        results.push(OcrResult {
            text: text.to_string(),
            bounds: (left, top, left + width, top + height),
            confidence,
        });
    }
    results
}

/// Vision-language-model OCR through the shared chat-completion client.
///
/// Expects the model to answer with `{"items": [{"text": …, "bounds":
/// [l,t,r,b]}]}`; anything unparseable yields an empty result rather than an
/// error so a flaky model degrades to "screen unreadable".
pub struct VisionOcr {
    client: ModelClient,
    prompt: String,
}

impl VisionOcr {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: ModelClient::new(config),
            prompt: "You are an OCR engine. Extract all visible text with bounding boxes. \
                     Return JSON only: {\"items\": [{\"text\": \"...\", \"bounds\": [l,t,r,b]}]}. \
                     Bounds are pixel coordinates relative to the input image."
                .to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl OcrProvider for VisionOcr {
    async fn extract(&self, image: &DynamicImage) -> Result<Vec<OcrResult>, OcrError> {
        let png = encode_png(image)?;
        let base64_data = STANDARD.encode(png);
        let user_text = format!(
            "{}\nImage size: {}x{}",
            self.prompt,
            image.width(),
            image.height()
        );
        let messages = vec![
            MessageBuilder::create_system_message("You are a precise OCR extractor."),
            MessageBuilder::create_user_message(&user_text, Some(&base64_data)),
        ];
        let content = self
            .client
            .request(&messages)
            .await
            .map_err(|e| OcrError::BackendFailed(e.to_string()))?;

        let Some(payload) = extract_json_object(&content) else {
            return Ok(Vec::new());
        };
        Ok(parse_vision_items(&payload))
    }
}

fn parse_vision_items(payload: &Value) -> Vec<OcrResult> {
    let mut results = Vec::new();
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return results;
    };
    for item in items {
        let text = item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let bounds: Vec<i32> = item
            .get("bounds")
            .and_then(Value::as_array)
            .map(|b| b.iter().filter_map(|v| v.as_i64().map(|n| n as i32)).collect())
            .unwrap_or_default();
        if text.is_empty() || bounds.len() != 4 {
            continue;
        }
        results.push(OcrResult {
            text,
            bounds: (bounds[0], bounds[1], bounds[2], bounds[3]),
            confidence: item.get("confidence").and_then(Value::as_f64).map(|c| c as f32),
        });
    }
    results
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| OcrError::BackendFailed(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Build an OCR provider from a configuration key.
///
/// Known keys: `null` (or empty), `tesseract[:<lang>]`, `vision` (needs a
/// model configuration).
pub fn build_ocr_provider(
    key: &str,
    model_config: Option<ModelConfig>,
) -> Result<std::sync::Arc<dyn OcrProvider>, OcrError> {
    let key = key.trim().to_lowercase();
    if key.is_empty() || key == "null" || key == "none" {
        return Ok(std::sync::Arc::new(NullOcr));
    }
    if let Some(rest) = key.strip_prefix("tesseract") {
        let lang = rest.strip_prefix(':').unwrap_or("eng");
        return Ok(std::sync::Arc::new(TesseractOcr::new(lang)));
    }
    if key == "vision" {
        let config = model_config.ok_or_else(|| OcrError::MissingModelConfig(key.clone()))?;
        return Ok(std::sync::Arc::new(VisionOcr::new(config)));
    }
    Err(OcrError::UnsupportedProvider(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_null_ocr() {
        let image = DynamicImage::new_rgb8(4, 4);
        assert!(NullOcr.extract(&image).await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_tesseract_tsv() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   5\t1\t1\t1\t1\t1\t10\t20\t100\t30\t91.5\tSign\n\
                   5\t1\t1\t1\t1\t2\t120\t20\t40\t30\t-1\t\n";
        let results = parse_tesseract_tsv(tsv);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Sign");
        assert_eq!(results[0].bounds, (10, 20, 110, 50));
        assert!((results[0].confidence.unwrap() - 0.915).abs() < 1e-6);
    }

    #[test]
    fn test_parse_vision_items() {
        let payload = json!({
            "items": [
                {"text": "Submit", "bounds": [10, 10, 90, 40]},
                {"text": "", "bounds": [0, 0, 1, 1]},
                {"text": "bad bounds", "bounds": [1, 2]},
            ]
        });
        let results = parse_vision_items(&payload);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bounds, (10, 10, 90, 40));
    }

    #[test]
    fn test_build_ocr_provider_keys() {
        assert!(build_ocr_provider("", None).is_ok());
        assert!(build_ocr_provider("null", None).is_ok());
        assert!(build_ocr_provider("tesseract:deu", None).is_ok());
        assert!(matches!(
            build_ocr_provider("vision", None),
            Err(OcrError::MissingModelConfig(_))
        ));
        assert!(matches!(
            build_ocr_provider("paddle", None),
            Err(OcrError::UnsupportedProvider(_))
        ));
    }
}
