// src/llm/logging.rs
// Usage logging shared by gateway call sites

use crate::llm::types::TokenUsage;
use tracing::info;

/// Log token usage for one completed LLM request
pub fn log_usage(request_id: &str, provider: &str, usage: &TokenUsage) {
    info!(
        request_id = %request_id,
        provider = %provider,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        cached_tokens = usage.cached_tokens,
        cache_hit_rate = format!("{:.1}%", usage.cache_hit_rate() * 100.0),
        "LLM usage"
    );
}
