// src/pipeline/scoring.rs
// Layer 1 three-agent batch scoring with tier-first rubric
//
// Three perspectives (macro, market, signal quality) each score every
// article in a batch 0-100; the 0-300 total drives routing:
//   total < discard_threshold        -> discard
//   total < full_analysis_threshold  -> lightweight
//   otherwise                        -> full_analysis
//
// Prompt-cache layout per batch:
//   SYSTEM (scoring framework + all 3 rubrics)   [cache_control]
//   USER   (numbered article batch)              [cache_control]
//   USER   (agent-specific perspective prompt)
// Agent 1 populates the provider cache; agents 2 and 3 reuse the shared
// SYSTEM+batch prefix. Critical-event keywords bypass scoring entirely.

use crate::llm::{ChatMessage, ChatRequest, LlmGateway};
use crate::pipeline::critical::detect_critical_event;
use crate::pipeline::extract_json_object;
use crate::settings::{ProviderResolver, Purpose, ScoringThresholds};
use crate::stats::FilterStats;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Maximum characters of article text included in the batch prompt
const MAX_TEXT_LENGTH: usize = 3000;
/// Maximum characters of article title included in the batch prompt
const MAX_TITLE_LENGTH: usize = 200;
/// Default score assigned to an agent on failure (fail-open)
const DEFAULT_AGENT_SCORE: i64 = 50;
/// Per-agent LLM timeout
const AGENT_TIMEOUT_SECS: u64 = 60;
/// Default batch size for scoring runs
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Agent names in execution order
const AGENT_NAMES: [&str; 3] = ["macro", "market", "signal"];

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Shared SYSTEM prompt: tier-first methodology plus all three rubrics.
/// Carries the cache hint so agents 2 and 3 reuse agent 1's prefix.
const SYSTEM_PROMPT: &str = r#"你是专业的金融新闻投资价值评估系统。你需要对一批新闻进行投资重要性评分。

## 评分方法论：层级优先法（Tier-First Scoring）

1. 先将文章归入一个层级（tier）
2. 再在该层级的分数范围内给出具体分数
3. 必须同时返回层级名称和分数

## 输出格式

对每篇文章（按编号），返回 JSON：
{"1": {"tier": "层级名称", "score": 75, "reason": "评分理由（20字内）"}, "2": ...}

注意：
- score 必须在对应 tier 的分数范围内
- reason 必须简洁，不超过20字
- 只返回 JSON，不要添加其他内容

## 三个评估视角及层级定义

### 视角A：宏观视角（macro_agent）
从宏观经济和政策角度评估新闻对投资者的重要性。
| 层级 | 分数范围 | 标准 |
|------|---------|------|
| 极端 | 90-100 | 全球系统性事件（战争、央行紧急行动、主权违约） |
| 重大 | 70-89 | 重大宏观政策变动（利率决议非预期、重大制裁、关键数据大幅偏离预期） |
| 重要 | 50-69 | 常规重要宏观信息（定期经济数据符合预期、政策官员讲话） |
| 一般 | 30-49 | 有宏观背景但非核心（地区经济新闻、行业监管微调） |
| 边缘 | 10-29 | 微弱宏观关联（个股新闻附带宏观评论） |
| 无关 | 0-9 | 无宏观关联（纯个股/产品/娱乐） |

### 视角B：市场视角（market_agent）
从市场交易和资本运作角度评估新闻对投资者的重要性。
| 层级 | 分数范围 | 标准 |
|------|---------|------|
| 极端 | 90-100 | 全市场级冲击（触发熔断、大型蓝筹破产、市值TOP10重大事件） |
| 重大 | 70-89 | 显著板块级影响（龙头财报大幅超/低预期、重大并购、行业颠覆） |
| 重要 | 50-69 | 明确个股/板块影响（普通财报、评级调整、中等资本运作） |
| 一般 | 30-49 | 影响有限（次要公司动态、常规行业报告、小规模交易） |
| 边缘 | 10-29 | 无明确交易信号（泛泛市场评论、无具体标的建议） |
| 无关 | 0-9 | 无市场关联（纯技术/娱乐/社会新闻） |

### 视角C：信息质量视角（signal_agent）
从信息源质量和可操作性角度评估投资价值。
| 层级 | 分数范围 | 标准 |
|------|---------|------|
| 极高 | 90-100 | 独家突发+高度可操作（首发重大消息、实时数据披露） |
| 高 | 70-89 | 高质量一手信息（深度调查、独家采访、研报首发） |
| 中等 | 50-69 | 有价值信息（及时综合报道、有新数据点、专业解读） |
| 一般 | 30-49 | 部分参考价值（综合转载有补充、新闻通稿、会议纪要） |
| 低 | 10-29 | 信息量少（纯转载、翻炒旧闻、标题党） |
| 噪音 | 0-9 | 广告/水文/无信息量（软文、推广、完全过时信息） |
"#;

/// Per-agent perspective prompt, appended as the final USER message
fn agent_prompt(agent: &str) -> &'static str {
    match agent {
        "macro" => "请从【宏观视角（视角A）】评估以上新闻的投资重要性。使用宏观视角的层级定义进行评分。",
        "market" => "请从【市场视角（视角B）】评估以上新闻的投资重要性。使用市场视角的层级定义进行评分。",
        _ => "请从【信息质量视角（视角C）】评估以上新闻的投资价值。使用信息质量视角的层级定义进行评分。",
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Scoring input: the minimum slice of an article Layer 1 needs
#[derive(Debug, Clone)]
pub struct ScoringArticle {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// Scoring result from a single agent for a single article
#[derive(Debug, Clone, Serialize)]
pub struct AgentScore {
    pub agent: String,
    pub tier: String,
    pub score: i64,
    pub reason: String,
}

/// Layer 1 routing outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    Discard,
    Lightweight,
    FullAnalysis,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discard => "discard",
            Self::Lightweight => "lightweight",
            Self::FullAnalysis => "full_analysis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discard" => Some(Self::Discard),
            "lightweight" => Some(Self::Lightweight),
            "full_analysis" => Some(Self::FullAnalysis),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated scoring result for a single article across all 3 agents
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub url: String,
    /// 0-300 (sum of 3 agents)
    pub total_score: i64,
    /// In agent execution order (macro, market, signal)
    pub agent_scores: Vec<AgentScore>,
    pub routing: RoutingDecision,
    pub is_critical: bool,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct Layer1ScoringService {
    gateway: Arc<dyn LlmGateway>,
    resolver: Arc<ProviderResolver>,
    stats: FilterStats,
}

impl Layer1ScoringService {
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

    /// Score a list of articles and determine routing decisions.
    ///
    /// Articles are processed in batches of `batch_size`; results come back
    /// in input order. Never fails: a service-level failure (unresolvable
    /// model) defaults the affected articles to `lightweight` so nothing is
    /// silently dropped.
    pub async fn batch_score(
        &self,
        articles: &[ScoringArticle],
        batch_size: usize,
    ) -> Vec<ScoreResult> {
        if articles.is_empty() {
            return Vec::new();
        }
        let batch_size = batch_size.max(1);

        let t0 = Instant::now();
        // Thresholds read once for the entire scoring run
        let thresholds = self.resolver.scoring_thresholds().await;

        let mut all_results = Vec::with_capacity(articles.len());
        for batch in articles.chunks(batch_size) {
            match self.score_batch(batch, thresholds).await {
                Ok(results) => all_results.extend(results),
                Err(e) => {
                    error!(
                        "Layer 1 service-level failure: {e}. \
                         {} articles defaulting to 'lightweight'.",
                        batch.len()
                    );
                    all_results.extend(batch.iter().map(|a| default_result(a, &e.to_string())));
                }
            }
        }

        self.track_routing_stats(&all_results).await;

        info!(
            articles = articles.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Layer 1 scoring complete"
        );

        all_results
    }

    /// Score one batch with 3 concurrent agents
    async fn score_batch(
        &self,
        articles: &[ScoringArticle],
        thresholds: ScoringThresholds,
    ) -> crate::Result<Vec<ScoreResult>> {
        let t0 = Instant::now();

        // Critical-event fast path: matched articles skip LLM scoring
        let critical_matches: Vec<Option<&'static str>> = articles
            .iter()
            .map(|a| detect_critical_event(&a.title, &a.text))
            .collect();

        let non_critical: Vec<&ScoringArticle> = articles
            .iter()
            .zip(&critical_matches)
            .filter(|(_, m)| m.is_none())
            .map(|(a, _)| a)
            .collect();

        let mut agent_maps: Vec<serde_json::Map<String, Value>> =
            vec![serde_json::Map::new(); AGENT_NAMES.len()];

        if !non_critical.is_empty() {
            let batch_text = format_batch_text(&non_critical);
            let shared_messages = vec![
                ChatMessage::system(SYSTEM_PROMPT).cached(),
                ChatMessage::user(format!(
                    "以下是待评估的 {} 篇新闻：\n\n{}",
                    non_critical.len(),
                    batch_text
                ))
                .cached(),
            ];

            // Model resolution failure here is the service-level failure path
            let model = self.resolver.resolve(Purpose::Layer1Scoring).await?;

            let (macro_map, market_map, signal_map) = tokio::join!(
                self.run_agent("macro", &shared_messages, &model, non_critical.len()),
                self.run_agent("market", &shared_messages, &model, non_critical.len()),
                self.run_agent("signal", &shared_messages, &model, non_critical.len()),
            );
            agent_maps = vec![macro_map, market_map, signal_map];
        }

        // Assemble per-article results. Non-critical articles are renumbered
        // inside the LLM batch, so their 1-based JSON key differs from their
        // position in the input.
        let mut results = Vec::with_capacity(articles.len());
        let mut llm_batch_idx = 0usize;

        for (article, critical_match) in articles.iter().zip(&critical_matches) {
            if let Some(keyword) = critical_match {
                results.push(critical_result(article, keyword));
                continue;
            }

            llm_batch_idx += 1;
            let key = llm_batch_idx.to_string();

            let agent_scores: Vec<AgentScore> = AGENT_NAMES
                .iter()
                .zip(&agent_maps)
                .map(|(name, map)| extract_agent_score(name, map, &key))
                .collect();

            let total_score: i64 = agent_scores.iter().map(|s| s.score).sum();
            let routing = if total_score < thresholds.discard {
                RoutingDecision::Discard
            } else if total_score < thresholds.full_analysis {
                RoutingDecision::Lightweight
            } else {
                RoutingDecision::FullAnalysis
            };

            let reasoning_parts: Vec<String> = agent_scores
                .iter()
                .map(|s| format!("{}={}({})", s.agent, s.score, s.tier))
                .collect();

            results.push(ScoreResult {
                url: article.url.clone(),
                total_score,
                agent_scores,
                routing,
                is_critical: false,
                reasoning: format!("total={}, {}", total_score, reasoning_parts.join(", ")),
            });
        }

        let critical_count = critical_matches.iter().filter(|m| m.is_some()).count();
        info!(
            batch = articles.len(),
            critical = critical_count,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            discard_threshold = thresholds.discard,
            full_threshold = thresholds.full_analysis,
            "Layer 1 batch scored"
        );

        Ok(results)
    }

    /// Run a single scoring agent against the shared batch.
    ///
    /// Returns the parsed per-article JSON map; empty on LLM or parse
    /// failure (per-agent fail-open, handled during extraction).
    async fn run_agent(
        &self,
        agent: &str,
        shared_messages: &[ChatMessage],
        model: &crate::settings::ResolvedModel,
        batch_size: usize,
    ) -> serde_json::Map<String, Value> {
        let mut messages = shared_messages.to_vec();
        messages.push(ChatMessage::user(agent_prompt(agent)));

        let request = ChatRequest::new(messages)
            .json_object()
            .with_temperature(0.2)
            .with_max_tokens((batch_size as u32 * 80).max(2000))
            .with_timeout(AGENT_TIMEOUT_SECS);

        let t0 = Instant::now();
        match self.gateway.chat(model, request).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    self.stats
                        .track_tokens(
                            &format!("layer1_{agent}"),
                            usage.prompt_tokens,
                            usage.completion_tokens,
                        )
                        .await;
                    self.stats
                        .increment_by("layer1_prompt_tokens", i64::from(usage.prompt_tokens))
                        .await;
                    self.stats
                        .increment_by("layer1_cached_tokens", i64::from(usage.cached_tokens))
                        .await;
                }

                let content = response.content.unwrap_or_default();
                let parsed = extract_json_object(&content);
                info!(
                    agent,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    articles = batch_size,
                    parsed_keys = parsed.len(),
                    "Layer 1 agent completed"
                );
                parsed
            }
            Err(e) => {
                error!(
                    agent,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "Layer 1 agent failed: {e}"
                );
                serde_json::Map::new()
            }
        }
    }

    /// Increment routing counters (non-fatal)
    async fn track_routing_stats(&self, results: &[ScoreResult]) {
        for result in results {
            let counter = match result.routing {
                RoutingDecision::Discard => "layer1_discard",
                RoutingDecision::Lightweight => "layer1_lightweight",
                RoutingDecision::FullAnalysis => "layer1_full_analysis",
            };
            self.stats.increment(counter).await;
            if result.is_critical {
                self.stats.increment("layer1_critical_event").await;
            }
            // Score distribution in 50-point buckets for the dashboard
            let bucket = (result.total_score / 50).clamp(0, 5) * 50;
            self.stats
                .increment(&format!("layer1_score_{bucket}"))
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Render the numbered batch block inserted into the shared USER message
fn format_batch_text(articles: &[&ScoringArticle]) -> String {
    let parts: Vec<String> = articles
        .iter()
        .enumerate()
        .map(|(idx, article)| {
            format!(
                "[{}] {}\n{}",
                idx + 1,
                truncate_chars(&article.title, MAX_TITLE_LENGTH),
                truncate_chars(&article.text, MAX_TEXT_LENGTH)
            )
        })
        .collect();
    parts.join("\n\n")
}

/// Extract one agent's score for one article, defaulting on any problem
fn extract_agent_score(
    agent: &str,
    parsed: &serde_json::Map<String, Value>,
    key: &str,
) -> AgentScore {
    let Some(Value::Object(item)) = parsed.get(key) else {
        return AgentScore {
            agent: agent.to_string(),
            tier: "unknown".into(),
            score: DEFAULT_AGENT_SCORE,
            reason: "parse_missing".into(),
        };
    };

    let tier = item
        .get("tier")
        .and_then(|v| v.as_str())
        .map(|t| truncate_chars(t, 20))
        .unwrap_or_else(|| "unknown".into());

    let score = item
        .get("score")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_AGENT_SCORE)
        .clamp(0, 100);

    let reason = item
        .get("reason")
        .and_then(|v| v.as_str())
        .map(|r| truncate_chars(r, 100))
        .unwrap_or_default();

    AgentScore {
        agent: agent.to_string(),
        tier,
        score,
        reason,
    }
}

/// Fast-path result for a critical-event article
fn critical_result(article: &ScoringArticle, keyword: &str) -> ScoreResult {
    let agent_scores = AGENT_NAMES
        .iter()
        .map(|name| AgentScore {
            agent: name.to_string(),
            tier: "critical_event".into(),
            score: 100,
            reason: "关键事件自动满分".into(),
        })
        .collect();

    ScoreResult {
        url: article.url.clone(),
        total_score: 300,
        agent_scores,
        routing: RoutingDecision::FullAnalysis,
        is_critical: true,
        reasoning: format!(
            "关键事件关键词命中[{}]: {}",
            keyword,
            truncate_chars(&article.title, 60)
        ),
    }
}

/// Fail-open result used when the whole scoring service fails
fn default_result(article: &ScoringArticle, error: &str) -> ScoreResult {
    let reason = format!("service_error: {}", truncate_chars(error, 50));
    let agent_scores = AGENT_NAMES
        .iter()
        .map(|name| AgentScore {
            agent: name.to_string(),
            tier: "error".into(),
            score: DEFAULT_AGENT_SCORE,
            reason: reason.clone(),
        })
        .collect();

    ScoreResult {
        url: article.url.clone(),
        total_score: DEFAULT_AGENT_SCORE * 3,
        agent_scores,
        routing: RoutingDecision::Lightweight,
        is_critical: false,
        reasoning: format!("Service error fallback: {}", truncate_chars(error, 100)),
    }
}
