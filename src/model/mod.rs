//! Model client module for vision-language inference.

mod client;

pub use client::{extract_json_object, MessageBuilder, ModelClient, ModelConfig, ModelError};
