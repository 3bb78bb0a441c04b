// src/llm/openai_compat/request.rs
// OpenAI-compatible chat request serialization

use crate::llm::types::ChatMessage;
use serde::Serialize;
use serde_json::Value;

/// Chat completion request (OpenAI-compatible wire format).
///
/// Message `cache_control` hints serialize inline with each message and are
/// passed to the provider verbatim.
#[derive(Debug, Serialize)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl WireChatRequest {
    pub fn new(model: impl Into<String>, request: &crate::llm::ChatRequest) -> Self {
        Self {
            model: model.into(),
            messages: request.messages.clone(),
            response_format: request.response_format.clone(),
            tools: request.tools.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}
