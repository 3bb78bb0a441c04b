// src/pipeline/mod.rs
// The three-layer news processing pipeline

pub mod critical;
pub mod deep_analysis;
pub mod dispatcher;
pub mod fetch;
pub mod scoring;
pub mod single_filter;
pub mod state;
pub mod workflow;

use serde_json::Value;

/// Extract a JSON object from an LLM response, tolerating markdown fences.
///
/// Returns an empty object on parse failure; callers apply per-agent
/// defaults rather than failing the batch.
pub(crate) fn extract_json_object(text: &str) -> serde_json::Map<String, Value> {
    let mut trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed = trimmed.trim_start_matches("```json").trim_start_matches("```");
        if let Some(end) = trimmed.rfind("```") {
            trimmed = &trimmed[..end];
        }
        trimmed = trimmed.trim();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!("LLM response parsed but is not a JSON object");
            serde_json::Map::new()
        }
        Err(e) => {
            let snippet: String = trimmed.chars().take(300).collect();
            tracing::warn!("LLM JSON parse failed: {e}, text: {snippet}");
            serde_json::Map::new()
        }
    }
}
