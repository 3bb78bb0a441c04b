// src/llm/gateway.rs
// Gateway trait and HTTP implementation over OpenAI-compatible providers

use crate::error::{KingfisherError, Result};
use crate::llm::http_client::LlmHttpClient;
use crate::llm::openai_compat::{
    parse_chat_response, parse_stream_chunk, StreamChunkEvent, WireChatRequest,
};
use crate::llm::types::{ChatRequest, ChatResponse, StreamEvent};
use crate::settings::ResolvedModel;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Uniform chat surface over heterogeneous LLM providers.
///
/// Callers must not assume prompt-cache behaviour for correctness, only for
/// cost: the `cache_control` hints on messages are forwarded verbatim and
/// cache hits surface in `TokenUsage::cached_tokens`.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Send a chat completion request
    async fn chat(&self, model: &ResolvedModel, request: ChatRequest) -> Result<ChatResponse>;

    /// Send a streaming chat request
    async fn chat_stream(
        &self,
        model: &ResolvedModel,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Production gateway speaking the OpenAI-compatible wire format
pub struct HttpLlmGateway {
    http: LlmHttpClient,
}

impl HttpLlmGateway {
    pub fn new() -> Self {
        Self {
            http: LlmHttpClient::new(),
        }
    }

    fn chat_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn new_request_id() -> String {
        uuid::Uuid::new_v4().to_string()[..8].to_string()
    }
}

impl Default for HttpLlmGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    #[instrument(skip(self, request), fields(model = %model.model, provider = %model.provider))]
    async fn chat(&self, model: &ResolvedModel, request: ChatRequest) -> Result<ChatResponse> {
        let request_id = Self::new_request_id();
        let timeout = Duration::from_secs(request.timeout_secs);
        let wire = WireChatRequest::new(&model.model, &request);
        let body = serde_json::to_string(&wire)?;

        let had_tools = request.tools.is_some();
        let t0 = Instant::now();
        let response_body = match self
            .http
            .execute_with_retry(
                &request_id,
                &Self::chat_url(&model.base_url),
                &model.api_key,
                body,
                timeout,
            )
            .await
        {
            Ok(body) => body,
            // A 4xx that names tools means the provider rejected the tool
            // schemas, not the request itself. Report the flag; the caller
            // decides whether to retry without tools.
            Err(e)
                if had_tools
                    && e.to_string().contains("status 400")
                    && e.to_string().contains("tool") =>
            {
                return Ok(ChatResponse {
                    request_id,
                    content: None,
                    usage: None,
                    finish_reason: None,
                    tools_supported: false,
                    duration_ms: t0.elapsed().as_millis() as u64,
                });
            }
            Err(e) => return Err(e),
        };
        let duration_ms = t0.elapsed().as_millis() as u64;

        let response = parse_chat_response(&response_body, &request_id, duration_ms)?;

        if let Some(ref usage) = response.usage {
            crate::llm::logging::log_usage(&request_id, &model.provider.to_string(), usage);
        }

        Ok(response)
    }

    async fn chat_stream(
        &self,
        model: &ResolvedModel,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let request_id = Self::new_request_id();
        let timeout = Duration::from_secs(request.timeout_secs);
        let wire = WireChatRequest::new(&model.model, &request).streaming();
        let body = serde_json::to_string(&wire)?;

        let response = self
            .http
            .inner()
            .post(Self::chat_url(&model.base_url))
            .header("Authorization", format!("Bearer {}", model.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| KingfisherError::Llm(format!("transport: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let snippet: String = error_body.chars().take(200).collect();
            return Err(KingfisherError::Llm(format!(
                "api: stream request failed with status {status}: {snippet}"
            )));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk
                    .map_err(|e| KingfisherError::Llm(format!("transport: stream read: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are newline-delimited; keep the trailing partial line
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match parse_stream_chunk(data)? {
                        StreamChunkEvent::Done => return,
                        StreamChunkEvent::Events(events) => {
                            for event in events {
                                yield event;
                            }
                        }
                    }
                }
            }
            tracing::debug!(request_id = %request_id, "stream ended without [DONE]");
        };

        Ok(stream.boxed())
    }
}
