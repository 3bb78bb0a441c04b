//! Test utilities for Kingfisher integration tests

use async_trait::async_trait;
use futures::stream::BoxStream;
use kingfisher::db::pool::DatabasePool;
use kingfisher::db::settings::{set_assignment_sync, LlmAssignmentRow};
use kingfisher::db::types::RelatedEntity;
use kingfisher::error::{KingfisherError, Result};
use kingfisher::index::{IndexReport, IndexWriter};
use kingfisher::llm::{ChatRequest, ChatResponse, LlmGateway, StreamEvent, TokenUsage};
use kingfisher::pipeline::deep_analysis::{AnalysisResult, CacheStats, DeepAnalyzer};
use kingfisher::pipeline::state::FilterDecision;
use kingfisher::settings::ResolvedModel;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

/// Create an in-memory pool with LLM assignments for every pipeline purpose
pub async fn seeded_pool() -> Arc<DatabasePool> {
    let pool = Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    );
    pool.interact(|conn| {
        for purpose in [
            "layer1_scoring",
            "phase2_layer2_analysis",
            "phase2_layer2_lightweight",
            "news_filter",
        ] {
            set_assignment_sync(
                conn,
                &LlmAssignmentRow {
                    purpose: purpose.into(),
                    provider: "deepseek".into(),
                    model: "deepseek-chat".into(),
                    api_key: "sk-test".into(),
                    base_url: String::new(),
                },
            )?;
        }
        Ok(())
    })
    .await
    .expect("seed assignments");
    pool
}

enum MockReply {
    Content(String),
    Error(String),
}

/// Gateway whose replies are scripted by substring match on the request's
/// final message, with prompt-cache simulation over the cacheable prefix.
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

    pub fn reply(mut self, needle: &str, content: &str) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Content(content.to_string())));
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Error(message.to_string())));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

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
            .ok_or_else(|| KingfisherError::Llm("mock: no matching rule".into()))?;

        let content = match reply {
            MockReply::Content(content) => content.clone(),
            MockReply::Error(message) => return Err(KingfisherError::Llm(message.clone())),
        };

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

/// Deep analyzer with a scripted decision and fixed enrichment
pub struct ScriptedDeep {
    pub decision: FilterDecision,
}

#[async_trait]
impl DeepAnalyzer for ScriptedDeep {
    async fn full_analysis(
        &self,
        _title: &str,
        _cleaned_text: &str,
        _image_insights: &str,
        _symbol: &str,
    ) -> AnalysisResult {
        AnalysisResult {
            decision: self.decision,
            entities: vec![
                RelatedEntity {
                    entity: "NVDA".into(),
                    entity_type: "stock".into(),
                    score: 0.95,
                },
                RelatedEntity {
                    entity: "SPX".into(),
                    entity_type: "index".into(),
                    score: 0.5,
                },
                RelatedEntity {
                    entity: "Fed利率".into(),
                    entity_type: "macro".into(),
                    score: 0.4,
                },
            ],
            sentiment: "bullish".into(),
            industry_tags: vec!["tech".into()],
            event_tags: vec!["earnings".into()],
            investment_summary: "业绩超预期".into(),
            detailed_summary: "公司公布强劲财报，核心业务继续高速增长。".into(),
            analysis_report: "## 核心解读\n业绩大超预期。".into(),
            market_context: None,
            cache_stats: CacheStats::default(),
        }
    }
}

/// Index writer reporting fixed chunk counts
pub struct ScriptedIndex {
    pub chunks: usize,
}

#[async_trait]
impl IndexWriter for ScriptedIndex {
    async fn write(
        &self,
        _source_type: &str,
        _source_id: &str,
        _content: &str,
        _symbol: Option<&str>,
    ) -> Result<IndexReport> {
        Ok(IndexReport {
            chunks_total: self.chunks,
            chunks_stored: self.chunks,
        })
    }
}
