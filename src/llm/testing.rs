// src/llm/testing.rs
// Scripted mock gateway shared by pipeline unit tests

use crate::error::{KingfisherError, Result};
use crate::llm::{ChatRequest, ChatResponse, LlmGateway, StreamEvent, TokenUsage};
use crate::settings::ResolvedModel;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::sync::Mutex;

enum MockReply {
    Content(String),
    Error(String),
}

/// A gateway whose replies are scripted by substring match on the request's
/// final message. Simulates provider prompt caching: the first request with
/// a given cacheable prefix reports zero cached tokens, later requests with
/// the same prefix report the full prefix token estimate.
pub struct MockGateway {
    rules: Vec<(String, MockReply)>,
    pub calls: Mutex<Vec<ChatRequest>>,
    seen_prefixes: Mutex<HashSet<u64>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
            seen_prefixes: Mutex::new(HashSet::new()),
        }
    }

    /// Reply with `content` when the final message contains `needle`
    pub fn reply(mut self, needle: &str, content: &str) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Content(content.to_string())));
        self
    }

    /// Fail with an error when the final message contains `needle`
    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Error(message.to_string())));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Rough token estimate used for mock usage accounting
    fn estimate_tokens(text: &str) -> u32 {
        (text.chars().count() / 4) as u32
    }

    fn cacheable_prefix(request: &ChatRequest) -> (u64, u32) {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        let mut tokens = 0u32;
        for message in &request.messages {
            if message.cache_control.is_some() {
                message.content.hash(&mut hasher);
                tokens += Self::estimate_tokens(&message.content);
            }
        }
        (hasher.finish(), tokens)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn chat(&self, _model: &ResolvedModel, request: ChatRequest) -> Result<ChatResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        let last_content = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| last_content.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .ok_or_else(|| {
                KingfisherError::Llm(format!(
                    "mock: no rule matches final message: {}",
                    &last_content.chars().take(80).collect::<String>()
                ))
            })?;

        let content = match reply {
            MockReply::Content(content) => content.clone(),
            MockReply::Error(message) => {
                return Err(KingfisherError::Llm(message.clone()));
            }
        };

        // Prompt-cache simulation over the cacheable prefix
        let (prefix_hash, prefix_tokens) = Self::cacheable_prefix(&request);
        let cached_tokens = {
            let mut seen = self
                .seen_prefixes
                .lock()
                .map_err(|_| KingfisherError::Other("mock lock poisoned".into()))?;
            if prefix_tokens > 0 && !seen.insert(prefix_hash) {
                prefix_tokens
            } else {
                0
            }
        };

        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| Self::estimate_tokens(&m.content))
            .sum();

        Ok(ChatResponse {
            request_id: "mock".into(),
            content: Some(content.clone()),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens: Self::estimate_tokens(&content),
                cached_tokens,
            }),
            finish_reason: Some("stop".into()),
            tools_supported: true,
            duration_ms: 1,
        })
    }

    async fn chat_stream(
        &self,
        _model: &ResolvedModel,
        _request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Err(KingfisherError::Llm("mock: streaming not scripted".into()))
    }
}
