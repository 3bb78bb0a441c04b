// src/pipeline/deep_analysis.rs
// Layer 2 five-agent deep analysis with shared prompt cache
//
// Five specialised agents analyse one article in parallel. All five share
// the same SYSTEM message + article context (both cache_control=ephemeral),
// then append one unique instruction message. Agent 1 writes the provider
// prompt cache; agents 2-5 read from it.
//
// The full path is only entered for high-scored articles, so the decision
// is always "keep": this stage enriches, it does not re-triage.

use crate::llm::{ChatMessage, ChatRequest, LlmGateway};
use crate::pipeline::extract_json_object;
use crate::settings::{ProviderResolver, Purpose};
use crate::stats::FilterStats;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, warn};

/// Max chars of cleaned article text sent to the LLM
const MAX_CONTENT_LENGTH: usize = 20000;
/// Per-agent LLM timeout
const AGENT_TIMEOUT_SECS: u64 = 120;
/// Reports shorter than this are cleared as junk
const MIN_REPORT_LENGTH: usize = 30;

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Shared SYSTEM prompt: the full analysis framework. Cached across agents.
const BASE_ANALYSIS_SYSTEM: &str = r#"你是专业的金融新闻分析团队的一员。你将分析以下新闻文章，根据你的专业角色提供结构化的分析结果。所有输出必须为JSON格式。

## 分析框架

### 基本面维度
评估新闻对公司基本面的影响：营收与利润、估值影响（PE/PB/PS）、竞争格局、管理层变动、资本结构（融资、回购、分红、债务）。

### 技术面维度
关注新闻可能触发的技术信号：价格影响（支撑位/阻力位）、成交量、动量指标（RSI/MACD/均线）、波动率（VIX、隐含波动率）。

### 情绪维度
评估市场情绪和投资者心理：情绪指标（恐惧贪婪指数、看涨看跌比率）、资金流向、媒体报道基调、社交媒体热度。

### 宏观维度
分析宏观环境和政策影响：货币政策、财政政策、国际关系（贸易、制裁、地缘政治）、经济数据（GDP、CPI、PMI、就业）。

## 实体识别标准

### 股票代码格式
- 美股：1-5位大写字母（如 AAPL、MSFT、NVDA）
- A股：6位数字+交易所后缀（如 600519.SH、000858.SZ）
- 港股：4-5位数字+.HK（如 0700.HK、9988.HK）
- 指数：标准代码（如 SPX、IXIC、000001.SH、HSI）

### 实体分类
- stock：个股，必须使用标准股票代码
- index：指数，使用标准指数代码
- macro：宏观因素，使用简短中英文名称（如"Fed利率"、"CPI"、"美元指数"）

### 实体评分标准（score: 0.0-1.0）
- 0.9-1.0：新闻直接讨论该实体，是核心主题
- 0.7-0.89：新闻显著提及该实体，有实质性关联
- 0.5-0.69：新闻间接关联，可能受到影响
- 0.3-0.49：弱关联，仅在行业/板块层面
- 0.0-0.29：边缘关联，可忽略

## 行业分类体系
tech(科技/互联网/半导体)、finance(银行/保险/券商)、healthcare(医药/医疗器械)、energy(石油/新能源/电力)、consumer(零售/食品/家电)、industrial(制造/航空/国防)、materials(化工/钢铁/建材)、utilities(公用事业)、realestate(房地产)、telecom(电信)

## 事件分类体系
earnings(财报)、merger(并购/重组)、ipo(IPO/增发/退市)、regulatory(监管/反垄断)、executive(高管变动)、product(新产品/专利)、lawsuit(诉讼)、dividend(分红)、buyback(回购)、guidance(业绩指引)、macro(宏观政策/经济数据)

## 输出质量要求
1. 数据准确：所有引用的数字、日期、公司名必须与原文一致
2. 逻辑清晰：因果关系明确，不做无依据的推断
3. 投资导向：每个分析结论都应指向可操作的投资建议
4. 格式规范：严格遵循JSON格式要求，字段名和值类型必须正确"#;

const ENTITY_EXTRACTION_PROMPT: &str = r#"你的角色：实体提取专家
提取所有关联的股票、指数和宏观因素实体。

输出JSON：
{
  "entities": [
    {"entity": "AAPL", "type": "stock", "score": 0.95},
    {"entity": "Fed利率", "type": "macro", "score": 0.7}
  ]
}

注意：
- type=stock的entity必须使用股票代码（如AAPL, 600519.SH, 0700.HK），不要用公司名
- type=index: 指数代码（如SPX, IXIC, 000001.SH, HSI）
- type=macro: 宏观因素，用简短中文/英文名
- 最多6个实体，score范围0.0-1.0"#;

const SENTIMENT_TAGS_PROMPT: &str = r#"你的角色：情绪与标签分析师
判断新闻情绪和分类标签。

输出JSON：
{
  "sentiment": "bullish/bearish/neutral",
  "industry_tags": ["tech"],
  "event_tags": ["earnings", "guidance"]
}

industry_tags选项: tech/finance/healthcare/energy/consumer/industrial/materials/utilities/realestate/telecom
event_tags选项: earnings/merger/ipo/regulatory/executive/product/lawsuit/dividend/buyback/guidance/macro
- 每类最多5个标签"#;

const SUMMARY_GENERATION_PROMPT: &str = r#"你的角色：摘要生成专家
生成投资导向的摘要内容。

输出JSON：
{
  "investment_summary": "1句话概况（不超过50字）",
  "detailed_summary": "保留所有关键细节的完整总结，包含重要数据、时间线、人物、因果关系"
}

要求：
- investment_summary: 精炼的1句话，不超过50字，用于卡片预览
- detailed_summary: 长度5-20句话，视复杂程度调整，不能遗漏重要数据和因果关系"#;

const IMPACT_ASSESSMENT_PROMPT: &str = r#"你的角色：影响力评估师
评估新闻对市场、行业和个股的影响。

输出JSON：
{
  "market_impact": "对整体市场的影响分析",
  "sector_impact": "对相关行业板块的影响",
  "stock_impact": "对具体个股的影响分析",
  "time_horizon": "short_term/medium_term/long_term",
  "impact_magnitude": "high/medium/low"
}

要求：每个影响字段2-3句话，数据和结论要有理有据。"#;

const REPORT_WRITING_PROMPT: &str = r###"你的角色：报告撰写专家
撰写Markdown格式的专业分析报告。

**重要：analysis_report的值必须是一个Markdown字符串，不能是嵌套JSON对象。**
用\n表示换行，将整个报告放在一个字符串值中。

输出JSON：
{
  "analysis_report": "## 核心解读\n...\n\n## 投资洞察\n...\n\n## 风险分析\n...\n\n## 市场影响\n...\n\n## 情绪指数\n...\n\n## 专业信息\n..."
}

报告必须包含6个章节（核心解读、投资洞察、风险分析、市场影响、情绪指数、专业信息）。
每章节2-4句话，数据和结论要有理有据。"###;

fn instruction_for(agent: &str) -> &'static str {
    match agent {
        "entity_extractor" => ENTITY_EXTRACTION_PROMPT,
        "sentiment_tags" => SENTIMENT_TAGS_PROMPT,
        "summary_generator" => SUMMARY_GENERATION_PROMPT,
        "impact_assessor" => IMPACT_ASSESSMENT_PROMPT,
        _ => REPORT_WRITING_PROMPT,
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Validated entity in an analysis result
pub use crate::db::types::RelatedEntity;

/// Per-agent usage entry in the cache stats block
#[derive(Debug, Clone, Serialize, Default)]
pub struct AgentUsage {
    pub success: bool,
    pub elapsed_ms: u64,
    pub prompt_tokens: u32,
    pub cached_tokens: u32,
    pub completion_tokens: u32,
}

/// Cache-efficacy statistics for one five-agent run
#[derive(Debug, Clone, Serialize, Default)]
pub struct CacheStats {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
    pub cache_hit_rate: f64,
    pub agents_succeeded: usize,
    pub agents_failed: usize,
    pub elapsed_ms: u64,
    pub per_agent: HashMap<String, AgentUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Combined result from the five-agent analysis.
///
/// The production service always returns `decision = Keep`: the full path
/// is only entered for high-scored articles, so this stage enriches rather
/// than re-triages.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub decision: crate::pipeline::state::FilterDecision,
    pub entities: Vec<RelatedEntity>,
    pub sentiment: String,
    pub industry_tags: Vec<String>,
    pub event_tags: Vec<String>,
    pub investment_summary: String,
    pub detailed_summary: String,
    pub analysis_report: String,
    pub market_context: Option<Value>,
    pub cache_stats: CacheStats,
}

/// Internal container for a single agent's parsed output + usage.
/// Raw non-JSON output survives under the `_raw_content` key so the report
/// merger can recover markdown from it.
#[derive(Debug, Default)]
struct AgentResponse {
    data: serde_json::Map<String, Value>,
    prompt_tokens: u32,
    completion_tokens: u32,
    cached_tokens: u32,
    elapsed_ms: u64,
    success: bool,
}

// ---------------------------------------------------------------------------
// Service trait (mockable seam for the workflow)
// ---------------------------------------------------------------------------

/// Deep-analysis seam used by the Layer 2 workflow
#[async_trait]
pub trait DeepAnalyzer: Send + Sync {
    /// Run the full five-agent analysis. Never fails: service-level errors
    /// produce an empty result so the workflow still persists something.
    async fn full_analysis(
        &self,
        title: &str,
        cleaned_text: &str,
        image_insights: &str,
        symbol: &str,
    ) -> AnalysisResult;
}

pub struct MultiAgentAnalysisService {
    gateway: Arc<dyn LlmGateway>,
    resolver: Arc<ProviderResolver>,
    stats: FilterStats,
}

impl MultiAgentAnalysisService {
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

    async fn run_agent(
        &self,
        agent: &str,
        shared_messages: &[ChatMessage],
        model: &crate::settings::ResolvedModel,
    ) -> AgentResponse {
        let mut messages = shared_messages.to_vec();
        messages.push(ChatMessage::user(instruction_for(agent)));

        let request = ChatRequest::new(messages)
            .json_object()
            .with_temperature(0.3)
            .with_timeout(AGENT_TIMEOUT_SECS);

        let t0 = Instant::now();
        match self.gateway.chat(model, request).await {
            Ok(response) => {
                let elapsed_ms = t0.elapsed().as_millis() as u64;
                let usage = response.usage.unwrap_or_default();
                let content = response.content.unwrap_or_default();

                let mut data = extract_json_object(&content);
                if data.is_empty() && !content.trim().is_empty() {
                    // Keep the raw output: the report writer sometimes
                    // returns bare markdown instead of JSON
                    data.insert(
                        "_raw_content".into(),
                        Value::String(content.trim().to_string()),
                    );
                }

                AgentResponse {
                    success: !data.is_empty(),
                    data,
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    cached_tokens: usage.cached_tokens,
                    elapsed_ms,
                }
            }
            Err(e) => {
                let elapsed_ms = t0.elapsed().as_millis() as u64;
                warn!(agent, elapsed_ms, "deep-analysis agent failed: {e}");
                AgentResponse {
                    elapsed_ms,
                    ..Default::default()
                }
            }
        }
    }

    async fn track_token_stats(&self, responses: &HashMap<&'static str, AgentResponse>) {
        let total_prompt: u32 = responses.values().map(|r| r.prompt_tokens).sum();
        let total_completion: u32 = responses.values().map(|r| r.completion_tokens).sum();
        let total_cached: u32 = responses.values().map(|r| r.cached_tokens).sum();

        if total_prompt == 0 && total_completion == 0 {
            return;
        }

        self.stats
            .track_tokens("deep_multi_agent", total_prompt, total_completion)
            .await;
        self.stats
            .increment_by("deep_prompt_tokens", i64::from(total_prompt))
            .await;
        self.stats
            .increment_by("deep_cached_tokens", i64::from(total_cached))
            .await;

        for (name, response) in responses {
            if response.success && (response.prompt_tokens > 0 || response.completion_tokens > 0) {
                self.stats
                    .track_tokens(
                        &format!("agent_{name}"),
                        response.prompt_tokens,
                        response.completion_tokens,
                    )
                    .await;
            }
        }
    }
}

#[async_trait]
impl DeepAnalyzer for MultiAgentAnalysisService {
    async fn full_analysis(
        &self,
        title: &str,
        cleaned_text: &str,
        image_insights: &str,
        symbol: &str,
    ) -> AnalysisResult {
        let t0 = Instant::now();

        if cleaned_text.trim().is_empty() {
            return empty_result("empty cleaned text, no agents called");
        }

        let model = match self.resolver.resolve(Purpose::Layer2Analysis).await {
            Ok(model) => model,
            Err(e) => {
                warn!("deep analysis cannot resolve model: {e}");
                return empty_result(&e.to_string());
            }
        };

        // Shared prefix: SYSTEM + article context, both cache-hinted
        let truncated: String = cleaned_text.chars().take(MAX_CONTENT_LENGTH).collect();
        let mut context_parts = vec![format!("标题: {title}")];
        if !symbol.is_empty() {
            context_parts.push(format!("关联股票: {symbol}"));
        }
        if !image_insights.is_empty() {
            context_parts.push(format!("图片信息: {image_insights}"));
        }
        context_parts.push(format!("\n全文:\n{truncated}"));

        let shared_messages = vec![
            ChatMessage::system(BASE_ANALYSIS_SYSTEM).cached(),
            ChatMessage::user(context_parts.join("\n")).cached(),
        ];

        info!(symbol, title = %title.chars().take(80).collect::<String>(), "starting 5 deep-analysis agents");

        let (entity, sentiment, summary, impact, report) = tokio::join!(
            self.run_agent("entity_extractor", &shared_messages, &model),
            self.run_agent("sentiment_tags", &shared_messages, &model),
            self.run_agent("summary_generator", &shared_messages, &model),
            self.run_agent("impact_assessor", &shared_messages, &model),
            self.run_agent("report_writer", &shared_messages, &model),
        );

        let mut responses: HashMap<&'static str, AgentResponse> = HashMap::new();
        responses.insert("entity_extractor", entity);
        responses.insert("sentiment_tags", sentiment);
        responses.insert("summary_generator", summary);
        responses.insert("impact_assessor", impact);
        responses.insert("report_writer", report);

        let succeeded = responses.values().filter(|r| r.success).count();
        let failed = responses.len() - succeeded;
        if failed > 0 {
            let failed_names: Vec<&str> = responses
                .iter()
                .filter(|(_, r)| !r.success)
                .map(|(n, _)| *n)
                .collect();
            warn!(failed = ?failed_names, "deep-analysis agents failed");
        }

        self.track_token_stats(&responses).await;

        let mut result = merge_agent_results(&responses);

        let total_prompt: u32 = responses.values().map(|r| r.prompt_tokens).sum();
        let total_completion: u32 = responses.values().map(|r| r.completion_tokens).sum();
        let total_cached: u32 = responses.values().map(|r| r.cached_tokens).sum();
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        result.cache_stats = CacheStats {
            total_tokens: total_prompt + total_completion,
            prompt_tokens: total_prompt,
            completion_tokens: total_completion,
            cached_tokens: total_cached,
            cache_hit_rate: if total_prompt > 0 {
                (f64::from(total_cached) / f64::from(total_prompt) * 10_000.0).round() / 10_000.0
            } else {
                0.0
            },
            agents_succeeded: succeeded,
            agents_failed: failed,
            elapsed_ms,
            per_agent: responses
                .iter()
                .map(|(name, r)| {
                    (
                        name.to_string(),
                        AgentUsage {
                            success: r.success,
                            elapsed_ms: r.elapsed_ms,
                            prompt_tokens: r.prompt_tokens,
                            cached_tokens: r.cached_tokens,
                            completion_tokens: r.completion_tokens,
                        },
                    )
                })
                .collect(),
            error: None,
        };

        info!(
            symbol,
            tokens = result.cache_stats.total_tokens,
            cached = total_cached,
            cache_hit_rate = format!("{:.1}%", result.cache_stats.cache_hit_rate * 100.0),
            elapsed_ms,
            "deep analysis complete"
        );

        result
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

const VALID_SENTIMENTS: [&str; 3] = ["bullish", "bearish", "neutral"];
const VALID_INDUSTRY_TAGS: [&str; 10] = [
    "tech", "finance", "healthcare", "energy", "consumer", "industrial", "materials",
    "utilities", "realestate", "telecom",
];
const VALID_EVENT_TAGS: [&str; 11] = [
    "earnings", "merger", "ipo", "regulatory", "executive", "product", "lawsuit", "dividend",
    "buyback", "guidance", "macro",
];

fn ticker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // US tickers, A-share codes with exchange suffix, HK codes
        Regex::new(r"^(?:[A-Z]{1,5}|\d{6}\.(?:SH|SZ)|\d{4,5}\.HK)$").unwrap_or_else(|_| {
            // The pattern is a literal; this branch is unreachable
            Regex::new("$^").expect("empty regex")
        })
    })
}

/// Validate raw entity entries: known type, score in [0,1], ticker-form
/// identifiers for stocks, capped at 6.
fn validate_entities(raw: &[Value]) -> Vec<RelatedEntity> {
    let mut entities = Vec::new();
    for item in raw {
        let Some(obj) = item.as_object() else { continue };
        let Some(entity) = obj.get("entity").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(entity_type) = obj.get("type").and_then(|v| v.as_str()) else {
            continue;
        };
        if entity.is_empty() || !matches!(entity_type, "stock" | "index" | "macro") {
            continue;
        }
        if entity_type == "stock" && !ticker_regex().is_match(entity) {
            warn!(entity, "dropping stock entity without ticker-form identifier");
            continue;
        }
        let score = obj
            .get("score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        entities.push(RelatedEntity {
            entity: entity.to_string(),
            entity_type: entity_type.to_string(),
            score,
        });
        if entities.len() >= 6 {
            break;
        }
    }
    entities
}

/// Merge outputs from all five agents, defaulting any failed or malformed
/// agent's contribution.
fn merge_agent_results(responses: &HashMap<&'static str, AgentResponse>) -> AnalysisResult {
    let get = |name: &str| responses.get(name).filter(|r| r.success);

    // Entity extractor
    let entities = get("entity_extractor")
        .and_then(|r| r.data.get("entities"))
        .and_then(|v| v.as_array())
        .map(|raw| validate_entities(raw))
        .unwrap_or_default();

    // Sentiment & tags
    let mut sentiment = "neutral".to_string();
    let mut industry_tags = Vec::new();
    let mut event_tags = Vec::new();
    if let Some(response) = get("sentiment_tags") {
        if let Some(raw) = response.data.get("sentiment").and_then(|v| v.as_str()) {
            if VALID_SENTIMENTS.contains(&raw) {
                sentiment = raw.to_string();
            }
        }
        industry_tags = string_array(&response.data, "industry_tags")
            .into_iter()
            .filter(|t| VALID_INDUSTRY_TAGS.contains(&t.as_str()))
            .take(5)
            .collect();
        event_tags = string_array(&response.data, "event_tags")
            .into_iter()
            .filter(|t| VALID_EVENT_TAGS.contains(&t.as_str()))
            .take(5)
            .collect();
    }

    // Summary generator
    let mut investment_summary = String::new();
    let mut detailed_summary = String::new();
    if let Some(response) = get("summary_generator") {
        investment_summary = response
            .data
            .get("investment_summary")
            .and_then(|v| v.as_str())
            .map(|s| s.chars().take(500).collect())
            .unwrap_or_default();
        detailed_summary = response
            .data
            .get("detailed_summary")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default();

        if investment_summary.chars().count() < 2 {
            investment_summary.clear();
        }
        if detailed_summary.chars().count() < 10 {
            detailed_summary.clear();
        }
    }

    // Impact assessor
    let market_context = get("impact_assessor")
        .filter(|r| !r.data.is_empty())
        .map(|response| {
            let time_horizon = response
                .data
                .get("time_horizon")
                .and_then(|v| v.as_str())
                .filter(|t| matches!(*t, "short_term" | "medium_term" | "long_term"))
                .unwrap_or("medium_term");
            let impact_magnitude = response
                .data
                .get("impact_magnitude")
                .and_then(|v| v.as_str())
                .filter(|m| matches!(*m, "high" | "medium" | "low"))
                .unwrap_or("medium");
            let text_field = |key: &str| {
                response
                    .data
                    .get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            serde_json::json!({
                "market_impact": text_field("market_impact"),
                "sector_impact": text_field("sector_impact"),
                "stock_impact": text_field("stock_impact"),
                "time_horizon": time_horizon,
                "impact_magnitude": impact_magnitude,
            })
        });

    // Report writer
    let analysis_report = responses
        .get("report_writer")
        .map(extract_report)
        .unwrap_or_default();

    AnalysisResult {
        decision: crate::pipeline::state::FilterDecision::Keep,
        entities,
        sentiment,
        industry_tags,
        event_tags,
        investment_summary,
        detailed_summary,
        analysis_report,
        market_context,
        cache_stats: CacheStats::default(),
    }
}

fn string_array(data: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Recover the markdown report from the report-writer output.
///
/// Models misbehave here in two known ways, both treated as normal output
/// paths: `analysis_report` arrives as a nested object (converted to
/// markdown sections), or the whole response is raw markdown / JSON with
/// literal newlines inside strings (repaired, then recovered from the first
/// `##` header). Reports without section headers or under 30 chars are
/// cleared.
fn extract_report(response: &AgentResponse) -> String {
    let mut report = match response.data.get("analysis_report") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) if !map.is_empty() => dict_to_markdown(map, 2),
        _ => String::new(),
    };

    if report.is_empty() {
        if let Some(raw) = response
            .data
            .get("_raw_content")
            .and_then(|v| v.as_str())
            .filter(|raw| raw.len() >= 50)
        {
            if raw.trim_start().starts_with('{') {
                // JSON with literal newlines inside string values
                let repaired = repair_json_newlines(raw);
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&repaired) {
                    if let Some(Value::String(s)) = map.get("analysis_report") {
                        report = s.clone();
                    }
                }
            }
            if report.is_empty() {
                if let Some(md_start) = raw.find("##") {
                    report = raw[md_start..].trim().to_string();
                }
            }
        }
    }

    if !report.is_empty() && !report.contains("##") {
        warn!(
            length = report.len(),
            "analysis_report missing section headers"
        );
    }
    if report.chars().count() < MIN_REPORT_LENGTH {
        report.clear();
    }
    report
}

/// Escape literal newlines that appear inside JSON string values
fn repair_json_newlines(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        match c {
            '\\' if in_string && !escaped => {
                escaped = true;
                out.push(c);
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            '\n' if in_string => {
                out.push_str("\\n");
                escaped = false;
                continue;
            }
            _ => {}
        }
        escaped = false;
        out.push(c);
    }
    out
}

/// Convert a nested dict report into markdown sections
fn dict_to_markdown(map: &serde_json::Map<String, Value>, level: usize) -> String {
    let prefix = "#".repeat(level);
    let mut parts = Vec::new();

    for (key, value) in map {
        match value {
            Value::String(s) => parts.push(format!("{prefix} {key}\n{s}")),
            Value::Object(sub) => {
                let mut lines = vec![format!("{prefix} {key}")];
                for (sub_key, sub_val) in sub {
                    match sub_val {
                        Value::Array(items) => {
                            lines.push(format!("- **{sub_key}**："));
                            for item in items {
                                lines.push(format!("  - {}", flatten_value(item)));
                            }
                        }
                        other => lines.push(format!("- **{sub_key}**：{}", flatten_value(other))),
                    }
                }
                parts.push(lines.join("\n"));
            }
            Value::Array(items) => {
                let mut lines = vec![format!("{prefix} {key}")];
                for item in items {
                    lines.push(format!("- {}", flatten_value(item)));
                }
                parts.push(lines.join("\n"));
            }
            other => parts.push(format!("{prefix} {key}\n{}", flatten_value(other))),
        }
    }

    parts.join("\n\n")
}

fn flatten_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", flatten_value(v)))
            .collect::<Vec<_>>()
            .join("、"),
        other => other.to_string(),
    }
}

/// Safe empty result when analysis cannot proceed. The decision stays
/// "keep" so articles with potential value are never dropped here.
fn empty_result(error_reason: &str) -> AnalysisResult {
    warn!("returning empty deep-analysis result: {error_reason}");
    AnalysisResult {
        sentiment: "neutral".into(),
        cache_stats: CacheStats {
            error: Some(error_reason.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}
