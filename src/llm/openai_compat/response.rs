// src/llm/openai_compat/response.rs
// OpenAI-compatible chat response parsing (non-streaming and SSE chunks)

use crate::error::{KingfisherError, Result};
use crate::llm::types::{ChatResponse, StreamEvent, TokenUsage};
use serde::Deserialize;

/// Raw usage block. Providers disagree on where cached-token counts live:
/// DeepSeek reports `prompt_cache_hit_tokens`, OpenAI nests
/// `prompt_tokens_details.cached_tokens`. Both normalize into
/// `TokenUsage::cached_tokens`.
#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_cache_hit_tokens: Option<u32>,
    #[serde(default)]
    prompt_tokens_details: Option<WirePromptDetails>,
}

#[derive(Debug, Deserialize)]
struct WirePromptDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}

impl WireUsage {
    fn normalize(self) -> TokenUsage {
        let cached_tokens = self
            .prompt_cache_hit_tokens
            .or_else(|| self.prompt_tokens_details.and_then(|d| d.cached_tokens))
            .unwrap_or(0);
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            cached_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Parse a non-streaming chat response body
pub fn parse_chat_response(
    response_body: &str,
    request_id: &str,
    duration_ms: u64,
) -> Result<ChatResponse> {
    let data: WireChatResponse = serde_json::from_str(response_body)
        .map_err(|e| KingfisherError::Llm(format!("parse: failed to parse chat response: {e}")))?;

    let choice = data.choices.into_iter().next();
    let (content, finish_reason) = match choice {
        Some(c) => (c.message.content, c.finish_reason),
        None => (None, None),
    };

    Ok(ChatResponse {
        request_id: request_id.to_owned(),
        content,
        usage: data.usage.map(WireUsage::normalize),
        finish_reason,
        tools_supported: true,
        duration_ms,
    })
}

// ---------------------------------------------------------------------------
// Streaming chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Events parsed from one SSE data payload
#[derive(Debug)]
pub enum StreamChunkEvent {
    Events(Vec<StreamEvent>),
    Done,
}

/// Parse one SSE `data:` payload into stream events.
///
/// A chunk may yield several events (content delta + finish in the same
/// payload, or a trailing usage-only chunk).
pub fn parse_stream_chunk(data: &str) -> Result<StreamChunkEvent> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamChunkEvent::Done);
    }

    let chunk: WireStreamChunk = serde_json::from_str(data)
        .map_err(|e| KingfisherError::Llm(format!("parse: bad stream chunk: {e}")))?;

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::ContentDelta(content));
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                events.push(StreamEvent::ToolCallDelta {
                    index: tc.index,
                    name,
                    arguments,
                });
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finish { reason });
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage.normalize()));
    }

    Ok(StreamChunkEvent::Events(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_response() {
        let json = r#"{
            "choices": [{
                "message": {"content": "{\"1\": {\"tier\": \"重大\", \"score\": 75}}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;

        let result = parse_chat_response(json, "req-1", 100).expect("parse");
        assert!(result.content.is_some());
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
        let usage = result.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.cached_tokens, 0);
    }

    #[test]
    fn test_deepseek_cache_fields_normalize() {
        let json = r#"{
            "choices": [{"message": {"content": "ok"}}],
            "usage": {
                "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150,
                "prompt_cache_hit_tokens": 80, "prompt_cache_miss_tokens": 20
            }
        }"#;
        let usage = parse_chat_response(json, "r", 0)
            .expect("parse")
            .usage
            .expect("usage");
        assert_eq!(usage.cached_tokens, 80);
    }

    #[test]
    fn test_openai_cache_details_normalize() {
        let json = r#"{
            "choices": [{"message": {"content": "ok"}}],
            "usage": {
                "prompt_tokens": 100, "completion_tokens": 50,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        }"#;
        let usage = parse_chat_response(json, "r", 0)
            .expect("parse")
            .usage
            .expect("usage");
        assert_eq!(usage.cached_tokens, 64);
    }

    #[test]
    fn test_parse_empty_choices() {
        let json = r#"{"choices": [], "usage": null}"#;
        let result = parse_chat_response(json, "r", 0).expect("parse");
        assert!(result.content.is_none());
        assert!(result.finish_reason.is_none());
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        assert!(parse_chat_response("not json", "r", 0).is_err());
    }

    #[test]
    fn test_stream_done_sentinel() {
        assert!(matches!(
            parse_stream_chunk("[DONE]").expect("parse"),
            StreamChunkEvent::Done
        ));
    }

    #[test]
    fn test_stream_content_and_finish() {
        let chunk = r#"{"choices": [{"delta": {"content": "Hel"}, "finish_reason": null}]}"#;
        match parse_stream_chunk(chunk).expect("parse") {
            StreamChunkEvent::Events(events) => {
                assert_eq!(events.len(), 1);
                assert!(matches!(&events[0], StreamEvent::ContentDelta(c) if c == "Hel"));
            }
            StreamChunkEvent::Done => panic!("not done"),
        }

        let finish = r#"{"choices": [{"delta": {}, "finish_reason": "stop"}]}"#;
        match parse_stream_chunk(finish).expect("parse") {
            StreamChunkEvent::Events(events) => {
                assert!(matches!(&events[0], StreamEvent::Finish { reason } if reason == "stop"));
            }
            StreamChunkEvent::Done => panic!("not done"),
        }
    }

    #[test]
    fn test_stream_trailing_usage_chunk() {
        let chunk = r#"{"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 7}}"#;
        match parse_stream_chunk(chunk).expect("parse") {
            StreamChunkEvent::Events(events) => {
                assert_eq!(events.len(), 1);
                match &events[0] {
                    StreamEvent::Usage(usage) => {
                        assert_eq!(usage.prompt_tokens, 12);
                        assert_eq!(usage.completion_tokens, 7);
                    }
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            StreamChunkEvent::Done => panic!("not done"),
        }
    }

    #[test]
    fn test_stream_tool_call_delta() {
        let chunk = r#"{"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "lookup", "arguments": "{\"q\":"}}
        ]}}]}"#;
        match parse_stream_chunk(chunk).expect("parse") {
            StreamChunkEvent::Events(events) => match &events[0] {
                StreamEvent::ToolCallDelta { index, name, arguments } => {
                    assert_eq!(*index, 0);
                    assert_eq!(name.as_deref(), Some("lookup"));
                    assert_eq!(arguments, "{\"q\":");
                }
                other => panic!("unexpected event: {other:?}"),
            },
            StreamChunkEvent::Done => panic!("not done"),
        }
    }
}
