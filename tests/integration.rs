//! End-to-end pipeline scenarios

mod test_utils;

use kingfisher::db::articles::{get_article_sync, insert_article_sync, ArticleInsert};
use kingfisher::db::stats::get_counter_totals_sync;
use kingfisher::db::trace::get_article_timeline_sync;
use kingfisher::db::types::{ContentStatus, FilterStatus};
use kingfisher::pipeline::deep_analysis::{DeepAnalyzer, MultiAgentAnalysisService};
use kingfisher::pipeline::scoring::{
    Layer1ScoringService, RoutingDecision, ScoringArticle, DEFAULT_BATCH_SIZE,
};
use kingfisher::pipeline::single_filter::SingleFilterService;
use kingfisher::pipeline::state::{ArticleJob, FilterDecision};
use kingfisher::pipeline::workflow::ArticleWorkflow;
use kingfisher::settings::ProviderResolver;
use kingfisher::stats::FilterStats;
use kingfisher::storage::{ContentFile, ContentStore};
use std::sync::Arc;
use tempfile::TempDir;
use test_utils::{seeded_pool, MockGateway, ScriptedDeep, ScriptedIndex};

fn article(url: &str, title: &str, text: &str) -> ScoringArticle {
    ScoringArticle {
        url: url.into(),
        title: title.into(),
        text: text.into(),
    }
}

/// Scenario 1 — critical fast-path: keyword hit bypasses the LLM entirely
#[tokio::test]
async fn scenario_critical_fast_path() {
    let pool = seeded_pool().await;
    let gateway = Arc::new(MockGateway::new());
    let scoring = Layer1ScoringService::new(
        gateway.clone(),
        Arc::new(ProviderResolver::new(pool.clone())),
        FilterStats::new(pool.clone()),
    );

    let batch = vec![article(
        "u",
        "Federal Reserve announces emergency rate cut",
        "Surprise inter-meeting move.",
    )];
    let results = scoring.batch_score(&batch, DEFAULT_BATCH_SIZE).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].is_critical);
    assert_eq!(results[0].total_score, 300);
    assert_eq!(results[0].routing, RoutingDecision::FullAnalysis);
    assert!(results[0]
        .agent_scores
        .iter()
        .all(|score| score.tier == "critical_event"));
    assert_eq!(gateway.call_count(), 0, "no LLM calls for a critical batch");

    let totals = pool
        .interact(|conn| get_counter_totals_sync(conn, 1))
        .await
        .expect("totals");
    assert_eq!(totals.get("layer1_critical_event"), Some(&1));
}

/// Scenario 2 — routing thresholds at (105, 195)
#[tokio::test]
async fn scenario_routing_thresholds() {
    let pool = seeded_pool().await;
    let gateway = Arc::new(
        MockGateway::new()
            .reply("宏观视角", r#"{"1": {"tier": "一般", "score": 20}, "2": {"tier": "重要", "score": 50}, "3": {"tier": "极端", "score": 90}}"#)
            .reply("市场视角", r#"{"1": {"tier": "一般", "score": 20}, "2": {"tier": "重要", "score": 50}, "3": {"tier": "重大", "score": 80}}"#)
            .reply("信息质量", r#"{"1": {"tier": "一般", "score": 20}, "2": {"tier": "一般", "score": 40}, "3": {"tier": "高", "score": 80}}"#),
    );
    let scoring = Layer1ScoringService::new(
        gateway,
        Arc::new(ProviderResolver::new(pool.clone())),
        FilterStats::new(pool.clone()),
    );

    let batch = vec![
        article("u1", "Minor", "low value"),
        article("u2", "Medium", "earnings in line"),
        article("u3", "Major", "sector-defining merger"),
    ];
    let results = scoring.batch_score(&batch, DEFAULT_BATCH_SIZE).await;

    assert_eq!(
        results.iter().map(|r| r.routing).collect::<Vec<_>>(),
        [
            RoutingDecision::Discard,
            RoutingDecision::Lightweight,
            RoutingDecision::FullAnalysis
        ]
    );

    let totals = pool
        .interact(|conn| get_counter_totals_sync(conn, 1))
        .await
        .expect("totals");
    assert_eq!(totals.get("layer1_discard"), Some(&1));
    assert_eq!(totals.get("layer1_lightweight"), Some(&1));
    assert_eq!(totals.get("layer1_full_analysis"), Some(&1));
}

/// Scenario 3 — prompt-cache hits across the three scoring agents
#[tokio::test]
async fn scenario_layer1_prompt_cache_hit_rate() {
    let pool = seeded_pool().await;
    let reply = r#"{"1": {"tier": "重要", "score": 50}, "2": {"tier": "重要", "score": 50},
        "3": {"tier": "重要", "score": 50}, "4": {"tier": "重要", "score": 50},
        "5": {"tier": "重要", "score": 50}}"#;
    let gateway = Arc::new(
        MockGateway::new()
            .reply("宏观视角", reply)
            .reply("市场视角", reply)
            .reply("信息质量", reply),
    );
    let scoring = Layer1ScoringService::new(
        gateway,
        Arc::new(ProviderResolver::new(pool.clone())),
        FilterStats::new(pool.clone()),
    );

    let batch: Vec<ScoringArticle> = (0..5)
        .map(|i| {
            article(
                &format!("u{i}"),
                &format!("Headline number {i}"),
                "A body paragraph with some substance to it.",
            )
        })
        .collect();
    scoring.batch_score(&batch, DEFAULT_BATCH_SIZE).await;

    let totals = pool
        .interact(|conn| get_counter_totals_sync(conn, 1))
        .await
        .expect("totals");
    let prompt = *totals.get("layer1_prompt_tokens").unwrap_or(&0);
    let cached = *totals.get("layer1_cached_tokens").unwrap_or(&0);
    let rate = cached as f64 / prompt.max(1) as f64;
    assert!(rate >= 0.6, "aggregate cache-hit rate {rate:.2} below 0.6");
}

/// Scenario 4 — report writer returns raw markdown instead of JSON
#[tokio::test]
async fn scenario_deep_analysis_report_recovery() {
    let pool = seeded_pool().await;
    let gateway = Arc::new(
        MockGateway::new()
            .reply(
                "实体提取专家",
                r#"{"entities": [{"entity": "AAPL", "type": "stock", "score": 0.9}]}"#,
            )
            .reply(
                "情绪与标签分析师",
                r#"{"sentiment": "bullish", "industry_tags": ["tech"], "event_tags": ["earnings"]}"#,
            )
            .reply(
                "摘要生成专家",
                r#"{"investment_summary": "苹果财报稳健", "detailed_summary": "苹果公布财报，服务业务增长显著，硬件销售平稳，管理层对下季度持乐观态度。"}"#,
            )
            .reply("影响力评估师", r#"{"time_horizon": "short_term", "impact_magnitude": "medium"}"#)
            .reply(
                "报告撰写专家",
                "## 核心解读\n苹果本季度业绩稳健，服务业务成为增长引擎，市场反应正面。\n\n## 投资洞察\n关注服务业务的持续增长。",
            ),
    );
    let service = MultiAgentAnalysisService::new(
        gateway,
        Arc::new(ProviderResolver::new(pool.clone())),
        FilterStats::new(pool),
    );

    let result = service
        .full_analysis("Apple earnings", "Apple reported quarterly earnings...", "", "AAPL")
        .await;

    assert!(
        result.analysis_report.starts_with("## 核心解读"),
        "report must be recovered from raw markdown"
    );
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.entities[0].entity, "AAPL");
    assert_eq!(result.sentiment, "bullish");
    assert_eq!(result.industry_tags, vec!["tech"]);
}

struct WorkflowSetup {
    workflow: ArticleWorkflow,
    pool: Arc<kingfisher::db::pool::DatabasePool>,
    store: Arc<ContentStore>,
    _dir: TempDir,
}

async fn workflow_setup(decision: FilterDecision) -> WorkflowSetup {
    let pool = seeded_pool().await;
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(ContentStore::new(dir.path()));
    let resolver = Arc::new(ProviderResolver::new(pool.clone()));
    let stats = FilterStats::new(pool.clone());
    let single = Arc::new(SingleFilterService::new(
        Arc::new(MockGateway::new().reply("标题:", r#"{"keep": true}"#)),
        resolver,
        stats.clone(),
    ));

    let workflow = ArticleWorkflow::new(
        pool.clone(),
        store.clone(),
        Arc::new(ScriptedDeep { decision }),
        single,
        Arc::new(ScriptedIndex { chunks: 4 }),
        stats,
    );

    WorkflowSetup {
        workflow,
        pool,
        store,
        _dir: dir,
    }
}

async fn seed_job(setup: &WorkflowSetup, id: &str) -> ArticleJob {
    let id_owned = id.to_string();
    setup
        .pool
        .interact(move |conn| {
            insert_article_sync(
                conn,
                &ArticleInsert {
                    id: &id_owned,
                    source: "reuters",
                    url: &format!("https://news/{id_owned}"),
                    title: "NVIDIA earnings beat expectations",
                    summary: Some("record data center quarter"),
                    symbol: Some("NVDA"),
                    market: "US",
                    published_at: None,
                },
            )
            .map(|_| ())
        })
        .await
        .expect("insert");

    let body = "NVIDIA reported record revenue driven by data center demand. ".repeat(10);
    let file_path = setup
        .store
        .save(
            id,
            Some("NVDA"),
            &ContentFile {
                url: format!("https://news/{id}"),
                title: "NVIDIA earnings beat expectations".into(),
                word_count: body.split_whitespace().count() as i64,
                full_text: body,
                language: Some("en".into()),
                ..Default::default()
            },
            None,
        )
        .expect("save content");

    ArticleJob {
        article_id: id.into(),
        url: format!("https://news/{id}"),
        market: "US".into(),
        symbol: "NVDA".into(),
        title: "NVIDIA earnings beat expectations".into(),
        summary: "record data center quarter".into(),
        source: "reuters".into(),
        published_at: None,
        use_two_phase: true,
        file_path: Some(file_path),
    }
}

/// Scenario 5 — full workflow, keep path
#[tokio::test]
async fn scenario_full_workflow_keep() {
    let setup = workflow_setup(FilterDecision::Keep).await;
    let job = seed_job(&setup, "a1").await;

    setup.workflow.run(job).await;

    let row = setup
        .pool
        .interact(|conn| get_article_sync(conn, "a1"))
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(row.content_status, ContentStatus::Embedded);
    assert_eq!(row.filter_status, FilterStatus::FineKeep);
    assert_eq!(row.related_entities.as_ref().map(Vec::len), Some(3));
    assert_eq!(row.sentiment_tag.as_deref(), Some("bullish"));
    assert_eq!(
        row.primary_entity.as_deref(),
        Some("NVDA"),
        "first stock entity becomes the primary entity"
    );

    let timeline = setup
        .pool
        .interact(|conn| get_article_timeline_sync(conn, "a1"))
        .await
        .expect("timeline");
    let nodes: Vec<&str> = timeline.iter().map(|e| e.event.node.as_str()).collect();
    assert_eq!(nodes, ["read_file", "deep_filter", "embed", "update_db"]);
    let embed_metadata = timeline[2].event.metadata.as_ref().expect("metadata");
    assert_eq!(embed_metadata["chunks_total"], 4);
    assert_eq!(embed_metadata["chunks_stored"], 4);
}

/// Scenario 6 — full workflow, delete path
#[tokio::test]
async fn scenario_full_workflow_delete() {
    let setup = workflow_setup(FilterDecision::Delete).await;
    let job = seed_job(&setup, "a1").await;
    let file_path = job.file_path.clone().expect("file path");

    setup.workflow.run(job).await;

    let row = setup
        .pool
        .interact(|conn| get_article_sync(conn, "a1"))
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(row.content_status, ContentStatus::Deleted);
    assert_eq!(row.filter_status, FilterStatus::FineDelete);
    assert!(row.content_file_path.is_none());
    assert!(!setup.store.exists(&file_path), "content file removed from disk");

    let timeline = setup
        .pool
        .interact(|conn| get_article_timeline_sync(conn, "a1"))
        .await
        .expect("timeline");
    let nodes: Vec<&str> = timeline.iter().map(|e| e.event.node.as_str()).collect();
    assert_eq!(nodes, ["read_file", "deep_filter", "mark_deleted", "update_db"]);
}

/// Empty cleaned text: no agent runs, empty result with error recorded
#[tokio::test]
async fn deep_analysis_empty_text_short_circuits() {
    let pool = seeded_pool().await;
    let gateway = Arc::new(MockGateway::new());
    let service = MultiAgentAnalysisService::new(
        gateway.clone(),
        Arc::new(ProviderResolver::new(pool.clone())),
        FilterStats::new(pool),
    );

    let result = service.full_analysis("title", "", "", "AAPL").await;
    assert_eq!(gateway.call_count(), 0);
    assert!(result.entities.is_empty());
    assert_eq!(result.decision, FilterDecision::Keep);
    assert!(result.cache_stats.error.is_some());
}
