// src/llm/types.rs
// Shared LLM types for messages, requests, and responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Prompt-cache hint attached to a message.
///
/// Passed through to the provider verbatim: "cache the prefix up to and
/// including this message". Providers that ignore it still work; the
/// cache-hit rate is simply near zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub cache_type: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            cache_type: "ephemeral".into(),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            cache_control: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            cache_control: None,
        }
    }

    /// Mark this message as the end of a cacheable prefix
    pub fn cached(mut self) -> Self {
        self.cache_control = Some(CacheControl::ephemeral());
        self
    }
}

/// Chat completion request handed to the gateway
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Response-format constraint, e.g. {"type": "json_object"}
    pub response_format: Option<Value>,
    /// Tool schemas (OpenAI function format). Providers that reject tools
    /// surface `tools_supported=false`; the caller decides whether to retry
    /// without them.
    pub tools: Option<Vec<Value>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            response_format: None,
            tools: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn json_object(mut self) -> Self {
        self.response_format = Some(serde_json::json!({"type": "json_object"}));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Normalized token usage across providers.
///
/// `cached_tokens` is the provider-reported count of prompt tokens served
/// from the prompt cache (0 on providers without cache counters).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Fraction of prompt tokens served from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        if self.prompt_tokens == 0 {
            0.0
        } else {
            self.cached_tokens as f64 / self.prompt_tokens as f64
        }
    }
}

/// Result of a chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub request_id: String,
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// False when the provider rejected tool schemas in the request; the
    /// caller decides whether to retry without tools.
    pub tools_supported: bool,
    pub duration_ms: u64,
}

/// Streaming event emitted by chat_stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentDelta(String),
    ToolCallDelta {
        index: u32,
        name: Option<String>,
        arguments: String,
    },
    Usage(TokenUsage),
    Finish {
        reason: String,
    },
}
