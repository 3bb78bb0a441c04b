// src/pipeline/single_filter.rs
// Legacy single-call relevance filter (lightweight path)

use crate::error::Result;
use crate::llm::{ChatMessage, ChatRequest, LlmGateway};
use crate::settings::{ProviderResolver, Purpose};
use crate::stats::FilterStats;
use crate::pipeline::extract_json_object;
use std::sync::Arc;
use tracing::info;

/// Per-call LLM timeout
const FILTER_TIMEOUT_SECS: u64 = 30;
/// Max chars of full text included in the filter prompt
const MAX_FILTER_TEXT: usize = 4000;

const FILTER_SYSTEM: &str = "你是金融新闻相关性过滤器。判断新闻是否对投资研究有价值。\
只返回 JSON：{\"keep\": true/false, \"reason\": \"简短理由\"}。\
保留标准：涉及上市公司、行业、宏观经济或市场交易的实质性信息。\
剔除标准：广告软文、娱乐八卦、与投资完全无关的内容。";

/// Single-call relevance filter used by the lightweight Layer 2 path.
pub struct SingleFilterService {
    gateway: Arc<dyn LlmGateway>,
    resolver: Arc<ProviderResolver>,
    stats: FilterStats,
}

impl SingleFilterService {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        resolver: Arc<ProviderResolver>,
        stats: FilterStats,
    ) -> Self {
        Self {
            gateway,
            resolver,
            stats,
        }
    }

    /// One LLM call yielding keep (true) / delete (false).
    ///
    /// Errors propagate to the caller, which defaults to keep.
    pub async fn evaluate_relevance(
        &self,
        title: &str,
        summary: &str,
        full_text: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<bool> {
        // The lightweight purpose may be unassigned in older deployments;
        // fall back to the legacy news_filter assignment.
        let model = match self.resolver.resolve(Purpose::Layer2Lightweight).await {
            Ok(model) => model,
            Err(_) => self.resolver.resolve(Purpose::NewsFilter).await?,
        };

        let mut context = format!("标题: {title}\n摘要: {summary}");
        if let Some(symbol) = symbol.filter(|s| !s.is_empty()) {
            context.push_str(&format!("\n关联股票: {symbol}"));
        }
        if let Some(text) = full_text.filter(|t| !t.trim().is_empty()) {
            let truncated: String = text.chars().take(MAX_FILTER_TEXT).collect();
            context.push_str(&format!("\n全文:\n{truncated}"));
        }

        let request = ChatRequest::new(vec![
            ChatMessage::system(FILTER_SYSTEM),
            ChatMessage::user(context),
        ])
        .json_object()
        .with_temperature(0.1)
        .with_max_tokens(200)
        .with_timeout(FILTER_TIMEOUT_SECS);

        let response = self.gateway.chat(&model, request).await?;

        if let Some(usage) = response.usage {
            self.stats
                .track_tokens("single_filter", usage.prompt_tokens, usage.completion_tokens)
                .await;
        }

        let parsed = extract_json_object(&response.content.unwrap_or_default());
        // Unparseable output keeps the article
        let keep = parsed.get("keep").and_then(|v| v.as_bool()).unwrap_or(true);
        info!(keep, title = %title.chars().take(60).collect::<String>(), "single filter decision");
        Ok(keep)
    }
}
