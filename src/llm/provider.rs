// src/llm/provider.rs
// Provider identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// LLM provider types.
///
/// All current providers speak the OpenAI-compatible chat wire format; the
/// kind mainly selects defaults and usage-field normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    DeepSeek,
    OpenAi,
    Zhipu,
    /// Any endpoint that speaks the OpenAI chat-completions format
    OpenAiCompat,
}

impl ProviderKind {
    /// Parse provider from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deepseek" => Some(Self::DeepSeek),
            "openai" => Some(Self::OpenAi),
            "zhipu" | "glm" => Some(Self::Zhipu),
            "openai_compat" | "compat" => Some(Self::OpenAiCompat),
            _ => None,
        }
    }

    /// Default API base URL for this provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
            Self::OpenAiCompat => "",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeepSeek => write!(f, "deepseek"),
            Self::OpenAi => write!(f, "openai"),
            Self::Zhipu => write!(f, "zhipu"),
            Self::OpenAiCompat => write!(f, "openai_compat"),
        }
    }
}
