// src/pipeline/workflow.rs
// Layer 2 per-article workflow graph
//
//           read_file
//               │
//         route_filter_mode ── if read failed ──► update_db ► END
//          │        │
//   two_phase    legacy
//      │            │
//  deep_filter   single_filter
//      │            │
//       route_decision
//          │    │
//        keep  delete
//          │    │
//        embed  mark_deleted
//          │    │
//           update_db ─► END
//
// The graph is fixed and tiny, so it is a hand-written dispatch on a node
// enum. Nodes never raise: failures land in the state bag and flow to the
// terminal update_db, which persists the article row and the buffered trace
// events together.

use crate::db::articles::{self, AnalysisUpdate};
use crate::db::pool::DatabasePool;
use crate::db::trace::{record_events_sync, TraceEvent};
use crate::db::types::{ContentStatus, FilterStatus};
use crate::index::IndexWriter;
use crate::pipeline::deep_analysis::DeepAnalyzer;
use crate::pipeline::single_filter::SingleFilterService;
use crate::pipeline::state::{ArticleJob, FilterDecision, FinalStatus, WorkflowState};
use crate::stats::FilterStats;
use crate::storage::ContentStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Workflow nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    ReadFile,
    DeepFilter,
    SingleFilter,
    Embed,
    MarkDeleted,
    UpdateDb,
    End,
}

pub struct ArticleWorkflow {
    pool: Arc<DatabasePool>,
    store: Arc<ContentStore>,
    deep: Arc<dyn DeepAnalyzer>,
    single: Arc<SingleFilterService>,
    index: Arc<dyn IndexWriter>,
    stats: FilterStats,
}

impl ArticleWorkflow {
    pub fn new(
        pool: Arc<DatabasePool>,
        store: Arc<ContentStore>,
        deep: Arc<dyn DeepAnalyzer>,
        single: Arc<SingleFilterService>,
        index: Arc<dyn IndexWriter>,
        stats: FilterStats,
    ) -> Self {
        Self {
            pool,
            store,
            deep,
            single,
            index,
            stats,
        }
    }

    /// Run the workflow for a single article. Returns the final state;
    /// exactly one terminal DB update happens per run.
    pub async fn run(&self, job: ArticleJob) -> WorkflowState {
        info!(
            article_id = %job.article_id,
            url = %job.url.chars().take(80).collect::<String>(),
            two_phase = job.use_two_phase,
            "starting article workflow"
        );

        let mut state = WorkflowState::new(job);
        let mut node = Node::ReadFile;

        loop {
            node = match node {
                Node::ReadFile => {
                    self.read_file(&mut state).await;
                    self.route_filter_mode(&state)
                }
                Node::DeepFilter => {
                    self.deep_filter(&mut state).await;
                    route_decision(&state)
                }
                Node::SingleFilter => {
                    self.single_filter(&mut state).await;
                    route_decision(&state)
                }
                Node::Embed => {
                    self.embed(&mut state).await;
                    Node::UpdateDb
                }
                Node::MarkDeleted => {
                    self.mark_deleted(&mut state).await;
                    Node::UpdateDb
                }
                Node::UpdateDb => {
                    self.update_db(&mut state).await;
                    Node::End
                }
                Node::End => break,
            };
        }

        info!(
            article_id = %state.job.article_id,
            status = state.final_status.as_str(),
            "article workflow completed"
        );
        state
    }

    /// Load the content file written by Layer 1.5
    async fn read_file(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();

        let Some(file_path) = state.job.file_path.clone() else {
            let error = "no file_path provided, content not fetched by Layer 1.5";
            warn!(article_id = %article_id, "read_file: {error}");
            state.fail(error);
            state.push_event(TraceEvent::error(
                &article_id,
                "2",
                "read_file",
                elapsed_ms(t0),
                error,
            ));
            return;
        };

        let content = self.store.read(&file_path);
        match content {
            Some(content) if !content.full_text.trim().is_empty() => {
                state.word_count = content.word_count;
                state.language = content.language.clone();
                state.authors = content.authors.clone();
                state.keywords = content.keywords.clone();
                state.push_event(TraceEvent::success(
                    &article_id,
                    "2",
                    "read_file",
                    elapsed_ms(t0),
                    Some(serde_json::json!({
                        "word_count": content.word_count,
                        "language": content.language,
                    })),
                ));
                state.full_text = Some(content.full_text);
            }
            _ => {
                let error = format!("cannot read content from {file_path}");
                warn!(article_id = %article_id, "read_file: {error}");
                state.fail(error.clone());
                state.push_event(TraceEvent::error(
                    &article_id,
                    "2",
                    "read_file",
                    elapsed_ms(t0),
                    &error,
                ));
            }
        }
    }

    /// Select two_phase / legacy, or fall straight through on read failure
    fn route_filter_mode(&self, state: &WorkflowState) -> Node {
        if state.final_status == FinalStatus::Failed {
            return Node::UpdateDb;
        }
        if state.job.use_two_phase {
            Node::DeepFilter
        } else {
            Node::SingleFilter
        }
    }

    /// Five-agent deep analysis (full path)
    async fn deep_filter(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();

        let text = state
            .full_text
            .clone()
            .unwrap_or_else(|| state.job.summary.clone());

        let result = self
            .deep
            .full_analysis(&state.job.title, &text, "", &state.job.symbol)
            .await;

        state.filter_decision = result.decision;
        match result.decision {
            FilterDecision::Delete => self.stats.increment("fine_delete").await,
            FilterDecision::Keep => self.stats.increment("fine_keep").await,
        }

        let entity_count = result.entities.len();
        state.entities = Some(result.entities);
        state.industry_tags = Some(result.industry_tags);
        state.event_tags = Some(result.event_tags);
        state.sentiment_tag = Some(result.sentiment.clone());
        state.investment_summary = Some(result.investment_summary);
        state.detailed_summary = Some(result.detailed_summary);
        state.analysis_report = Some(result.analysis_report);
        state.market_context = result.market_context;

        let decision = match state.filter_decision {
            FilterDecision::Keep => "keep",
            FilterDecision::Delete => "delete",
        };
        info!(article_id = %article_id, decision, "deep_filter decision");

        let event = match result.cache_stats.error {
            Some(ref error) => {
                self.stats.increment("filter_error").await;
                TraceEvent::error(&article_id, "2", "deep_filter", elapsed_ms(t0), error)
            }
            None => TraceEvent::success(
                &article_id,
                "2",
                "deep_filter",
                elapsed_ms(t0),
                Some(serde_json::json!({
                    "decision": decision,
                    "entity_count": entity_count,
                    "sentiment_tag": result.sentiment,
                    "cache_hit_rate": result.cache_stats.cache_hit_rate,
                })),
            ),
        };
        state.push_event(event);
    }

    /// Legacy single-call relevance filter (lightweight path)
    async fn single_filter(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();

        let keep = self
            .single
            .evaluate_relevance(
                &state.job.title,
                &state.job.summary,
                state.full_text.as_deref(),
                Some(&state.job.symbol),
            )
            .await;

        match keep {
            Ok(keep) => {
                state.filter_decision = if keep {
                    FilterDecision::Keep
                } else {
                    FilterDecision::Delete
                };
                let decision = if keep { "keep" } else { "delete" };
                info!(article_id = %article_id, decision, "single_filter decision");
                state.push_event(TraceEvent::success(
                    &article_id,
                    "2",
                    "single_filter",
                    elapsed_ms(t0),
                    Some(serde_json::json!({"decision": decision})),
                ));
            }
            Err(e) => {
                // Keep on any failure: preserve recall
                warn!(article_id = %article_id, "single_filter failed: {e}");
                self.stats.increment("filter_error").await;
                state.filter_decision = FilterDecision::Keep;
                state.push_event(TraceEvent::error(
                    &article_id,
                    "2",
                    "single_filter",
                    elapsed_ms(t0),
                    &e.to_string(),
                ));
            }
        }
    }

    /// Chunk + embed + replace vectors via the index writer
    async fn embed(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();

        let mut content_parts = Vec::new();
        if !state.job.title.is_empty() {
            content_parts.push(state.job.title.clone());
        }
        match state.full_text.as_deref() {
            Some(text) if !text.trim().is_empty() => content_parts.push(text.to_string()),
            _ if !state.job.summary.is_empty() => content_parts.push(state.job.summary.clone()),
            _ => {}
        }
        let content = content_parts.join("\n\n");

        if content.trim().is_empty() {
            let error = "no content to embed";
            state.fail(error);
            state.push_event(TraceEvent::error(
                &article_id,
                "2",
                "embed",
                elapsed_ms(t0),
                error,
            ));
            return;
        }

        let symbol = Some(state.job.symbol.as_str()).filter(|s| !s.is_empty());
        match self
            .index
            .write("news", &article_id, &content, symbol)
            .await
        {
            Ok(report) => {
                state.chunks_total = report.chunks_total;
                state.chunks_stored = report.chunks_stored;
                state.final_status = FinalStatus::Embedded;
                self.stats.increment("embedding_success").await;
                state.push_event(TraceEvent::success(
                    &article_id,
                    "2",
                    "embed",
                    elapsed_ms(t0),
                    Some(serde_json::json!({
                        "chunks_total": report.chunks_total,
                        "chunks_stored": report.chunks_stored,
                    })),
                ));
            }
            Err(e) => {
                warn!(article_id = %article_id, "embed failed: {e}");
                self.stats.increment("embedding_error").await;
                state.fail(format!("embed: {e}"));
                state.push_event(TraceEvent::error(
                    &article_id,
                    "2",
                    "embed",
                    elapsed_ms(t0),
                    &e.to_string(),
                ));
            }
        }
    }

    /// Delete the content file (best-effort) and mark the article deleted
    async fn mark_deleted(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();

        let file_path = state.job.file_path.take();
        if let Some(ref path) = file_path {
            if self.store.delete(path) {
                info!(article_id = %article_id, path = %path, "deleted content file");
            }
        }

        state.final_status = FinalStatus::Deleted;
        state.push_event(TraceEvent::success(
            &article_id,
            "2",
            "mark_deleted",
            elapsed_ms(t0),
            Some(serde_json::json!({"file_path": file_path})),
        ));
    }

    /// Terminal node: atomically write all analysis fields onto the article
    /// row, then persist the buffered trace events in the same transaction.
    /// Idempotent under job retry.
    async fn update_db(&self, state: &mut WorkflowState) {
        let t0 = Instant::now();
        let article_id = state.job.article_id.clone();
        let final_status = state.final_status;
        let two_phase = state.job.use_two_phase;

        let update = match final_status {
            FinalStatus::Embedded => Some(AnalysisUpdate {
                article_id: article_id.clone(),
                content_status: ContentStatus::Embedded,
                filter_status: two_phase.then_some(FilterStatus::FineKeep),
                clear_file_path: false,
                entities: state.entities.clone(),
                industry_tags: state.industry_tags.clone(),
                event_tags: state.event_tags.clone(),
                sentiment_tag: state.sentiment_tag.clone(),
                investment_summary: state.investment_summary.clone(),
                detailed_summary: state.detailed_summary.clone(),
                analysis_report: state.analysis_report.clone(),
                market_context: state.market_context.clone(),
            }),
            FinalStatus::Deleted => Some(AnalysisUpdate {
                article_id: article_id.clone(),
                content_status: ContentStatus::Deleted,
                filter_status: two_phase.then_some(FilterStatus::FineDelete),
                clear_file_path: true,
                ..Default::default()
            }),
            FinalStatus::Failed | FinalStatus::Pending => None,
        };

        let error = state.error.clone();
        let mut events = std::mem::take(&mut state.trace_events);

        let result = self
            .pool
            .interact(move |conn| {
                let tx = conn.unchecked_transaction()?;

                let current = articles::get_content_status_sync(&tx, &article_id)?;
                if current.is_none() {
                    warn!(article_id = %article_id, "update_db: article row not found");
                    return Ok(None);
                }

                let written_status = match update {
                    Some(ref update) => {
                        articles::apply_analysis_update_sync(&tx, update)?;
                        Some(update.content_status)
                    }
                    None => {
                        // Failed run: only advance to embedding_failed when the
                        // failure was in embedding and Layer 1.5 hasn't already
                        // recorded a terminal fetch failure.
                        let is_embed_error = error
                            .as_deref()
                            .map(|e| e.to_lowercase().contains("embed"))
                            .unwrap_or(false);
                        if is_embed_error
                            && !matches!(
                                current,
                                Some(ContentStatus::Failed) | Some(ContentStatus::Blocked)
                            )
                        {
                            articles::apply_analysis_update_sync(
                                &tx,
                                &AnalysisUpdate {
                                    article_id: article_id.clone(),
                                    content_status: ContentStatus::EmbeddingFailed,
                                    ..Default::default()
                                },
                            )?;
                            Some(ContentStatus::EmbeddingFailed)
                        } else {
                            current
                        }
                    }
                };

                events.push(TraceEvent::success(
                    &article_id,
                    "2",
                    "update_db",
                    elapsed_ms(t0),
                    Some(serde_json::json!({
                        "final_status": final_status.as_str(),
                        "content_status": written_status.map(|s| s.as_str()),
                    })),
                ));
                record_events_sync(&tx, &events)?;
                tx.commit()?;
                Ok(Some(()))
            })
            .await;

        if let Err(e) = result {
            warn!(article_id = %state.job.article_id, "update_db failed: {e}");
            // Best-effort: record the trace even when the row update failed
            let article_id = state.job.article_id.clone();
            let message = e.to_string();
            self.pool
                .try_interact("update_db fallback trace", move |conn| {
                    record_events_sync(
                        conn,
                        &[TraceEvent::error(
                            &article_id,
                            "2",
                            "update_db",
                            elapsed_ms(t0),
                            &message,
                        )],
                    )
                })
                .await;
        }
    }
}

fn elapsed_ms(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}

/// Route on the filter decision
fn route_decision(state: &WorkflowState) -> Node {
    match state.filter_decision {
        FilterDecision::Delete => Node::MarkDeleted,
        FilterDecision::Keep => Node::Embed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::articles::{get_article_sync, insert_article_sync, ArticleInsert};
    use crate::db::settings::{set_assignment_sync, LlmAssignmentRow};
    use crate::db::trace::get_article_timeline_sync;
    use crate::index::IndexReport;
    use crate::llm::testing::MockGateway;
    use crate::pipeline::deep_analysis::{AnalysisResult, CacheStats};
    use crate::db::types::RelatedEntity;
    use crate::settings::ProviderResolver;
    use crate::storage::ContentFile;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Scripted deep analyzer
    struct FakeDeep {
        decision: FilterDecision,
    }

    #[async_trait]
    impl DeepAnalyzer for FakeDeep {
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
                    RelatedEntity { entity: "NVDA".into(), entity_type: "stock".into(), score: 0.95 },
                    RelatedEntity { entity: "AMD".into(), entity_type: "stock".into(), score: 0.6 },
                    RelatedEntity { entity: "Fed利率".into(), entity_type: "macro".into(), score: 0.4 },
                ],
                sentiment: "bullish".into(),
                industry_tags: vec!["tech".into()],
                event_tags: vec!["earnings".into()],
                investment_summary: "强劲财报".into(),
                detailed_summary: "业绩全面超预期，数据中心业务继续高增长。".into(),
                analysis_report: "## 核心解读\n超预期。".into(),
                market_context: None,
                cache_stats: CacheStats::default(),
            }
        }
    }

    /// Scripted index writer
    struct FakeIndex {
        fail: bool,
    }

    #[async_trait]
    impl IndexWriter for FakeIndex {
        async fn write(
            &self,
            _source_type: &str,
            _source_id: &str,
            _content: &str,
            _symbol: Option<&str>,
        ) -> crate::Result<IndexReport> {
            if self.fail {
                return Err(crate::KingfisherError::Embedding("backend down".into()));
            }
            Ok(IndexReport {
                chunks_total: 4,
                chunks_stored: 4,
            })
        }
    }

    struct Setup {
        workflow: ArticleWorkflow,
        pool: Arc<DatabasePool>,
        store: Arc<ContentStore>,
        _dir: TempDir,
    }

    async fn setup(decision: FilterDecision, index_fails: bool) -> Setup {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        // Lightweight-filter assignment so the legacy path resolves
        pool.interact(|conn| {
            set_assignment_sync(
                conn,
                &LlmAssignmentRow {
                    purpose: "phase2_layer2_lightweight".into(),
                    provider: "deepseek".into(),
                    model: "deepseek-chat".into(),
                    api_key: "sk-test".into(),
                    base_url: String::new(),
                },
            )
        })
        .await
        .expect("seed");

        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ContentStore::new(dir.path()));
        let resolver = Arc::new(ProviderResolver::new(pool.clone()));
        let stats = FilterStats::new(pool.clone());
        let gateway = Arc::new(MockGateway::new().reply("标题:", r#"{"keep": true}"#));
        let single = Arc::new(SingleFilterService::new(
            gateway,
            resolver,
            stats.clone(),
        ));

        let workflow = ArticleWorkflow::new(
            pool.clone(),
            store.clone(),
            Arc::new(FakeDeep { decision }),
            single,
            Arc::new(FakeIndex { fail: index_fails }),
            stats,
        );

        Setup {
            workflow,
            pool,
            store,
            _dir: dir,
        }
    }

    async fn seed_article(setup: &Setup, id: &str, with_file: bool) -> ArticleJob {
        let id_owned = id.to_string();
        setup
            .pool
            .interact(move |conn| {
                insert_article_sync(
                    conn,
                    &ArticleInsert {
                        id: &id_owned,
                        source: "reuters",
                        url: &format!("https://x/{id_owned}"),
                        title: "NVIDIA earnings beat",
                        summary: Some("record quarter"),
                        symbol: Some("NVDA"),
                        market: "US",
                        published_at: None,
                    },
                )
                .map(|_| ())
            })
            .await
            .expect("insert");

        let file_path = if with_file {
            let text = "NVIDIA reported record data center revenue. ".repeat(10);
            Some(
                setup
                    .store
                    .save(
                        id,
                        Some("NVDA"),
                        &ContentFile {
                            url: format!("https://x/{id}"),
                            title: "NVIDIA earnings beat".into(),
                            full_text: text.clone(),
                            word_count: text.split_whitespace().count() as i64,
                            language: Some("en".into()),
                            ..Default::default()
                        },
                        None,
                    )
                    .expect("save"),
            )
        } else {
            None
        };

        ArticleJob {
            article_id: id.to_string(),
            url: format!("https://x/{id}"),
            market: "US".into(),
            symbol: "NVDA".into(),
            title: "NVIDIA earnings beat".into(),
            summary: "record quarter".into(),
            source: "reuters".into(),
            published_at: None,
            use_two_phase: true,
            file_path,
        }
    }

    fn timeline_nodes(events: &[crate::db::trace::StoredTraceEvent]) -> Vec<String> {
        events.iter().map(|e| e.event.node.clone()).collect()
    }

    #[tokio::test]
    async fn test_full_workflow_keep() {
        let setup = setup(FilterDecision::Keep, false).await;
        let job = seed_article(&setup, "a1", true).await;

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Embedded);
        assert_eq!(state.chunks_total, 4);
        assert_eq!(state.chunks_stored, 4);

        let article = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(article.content_status, ContentStatus::Embedded);
        assert_eq!(article.filter_status, FilterStatus::FineKeep);
        assert_eq!(article.related_entities.as_ref().map(Vec::len), Some(3));
        assert_eq!(article.sentiment_tag.as_deref(), Some("bullish"));
        assert_eq!(article.primary_entity.as_deref(), Some("NVDA"));

        let timeline = setup
            .pool
            .interact(|conn| get_article_timeline_sync(conn, "a1"))
            .await
            .expect("timeline");
        assert_eq!(
            timeline_nodes(&timeline),
            ["read_file", "deep_filter", "embed", "update_db"]
        );
    }

    #[tokio::test]
    async fn test_full_workflow_delete() {
        let setup = setup(FilterDecision::Delete, false).await;
        let job = seed_article(&setup, "a1", true).await;
        let file_path = job.file_path.clone().expect("file path");
        assert!(setup.store.exists(&file_path));

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Deleted);

        let article = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(article.content_status, ContentStatus::Deleted);
        assert_eq!(article.filter_status, FilterStatus::FineDelete);
        assert!(article.content_file_path.is_none(), "file reference cleared");
        assert!(!setup.store.exists(&file_path), "content file removed");

        let timeline = setup
            .pool
            .interact(|conn| get_article_timeline_sync(conn, "a1"))
            .await
            .expect("timeline");
        assert_eq!(
            timeline_nodes(&timeline),
            ["read_file", "deep_filter", "mark_deleted", "update_db"]
        );
    }

    #[tokio::test]
    async fn test_missing_file_goes_straight_to_update_db() {
        let setup = setup(FilterDecision::Keep, false).await;
        let job = seed_article(&setup, "a1", false).await;

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Failed);

        let timeline = setup
            .pool
            .interact(|conn| get_article_timeline_sync(conn, "a1"))
            .await
            .expect("timeline");
        assert_eq!(timeline_nodes(&timeline), ["read_file", "update_db"]);
        assert_eq!(timeline[0].event.status, "error");
    }

    #[tokio::test]
    async fn test_embed_failure_marks_embedding_failed() {
        let setup = setup(FilterDecision::Keep, true).await;
        let job = seed_article(&setup, "a1", true).await;

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Failed);

        let article = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(article.content_status, ContentStatus::EmbeddingFailed);
    }

    #[tokio::test]
    async fn test_legacy_path_uses_single_filter() {
        let setup = setup(FilterDecision::Keep, false).await;
        let mut job = seed_article(&setup, "a1", true).await;
        job.use_two_phase = false;

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Embedded);

        let article = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");
        // Legacy path never writes fine_keep
        assert_eq!(article.filter_status, FilterStatus::Pending);

        let timeline = setup
            .pool
            .interact(|conn| get_article_timeline_sync(conn, "a1"))
            .await
            .expect("timeline");
        assert_eq!(
            timeline_nodes(&timeline),
            ["read_file", "single_filter", "embed", "update_db"]
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_with_appended_trace() {
        let setup = setup(FilterDecision::Keep, false).await;
        let job = seed_article(&setup, "a1", true).await;

        setup.workflow.run(job.clone()).await;
        let first = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");

        setup.workflow.run(job).await;
        let second = setup
            .pool
            .interact(|conn| get_article_sync(conn, "a1"))
            .await
            .expect("get")
            .expect("exists");

        assert_eq!(first.content_status, second.content_status);
        assert_eq!(first.filter_status, second.filter_status);
        assert_eq!(first.sentiment_tag, second.sentiment_tag);

        // Trace has append semantics: two runs, two update_db events
        let timeline = setup
            .pool
            .interact(|conn| get_article_timeline_sync(conn, "a1"))
            .await
            .expect("timeline");
        let update_events = timeline
            .iter()
            .filter(|e| e.event.node == "update_db")
            .count();
        assert_eq!(update_events, 2);
    }

    #[tokio::test]
    async fn test_trace_is_buffered_until_update_db() {
        // A run against a missing article row writes no article update and
        // buffers its trace through the same terminal path
        let setup = setup(FilterDecision::Keep, false).await;
        let job = ArticleJob {
            article_id: "ghost".into(),
            use_two_phase: true,
            ..Default::default()
        };

        let state = setup.workflow.run(job).await;
        assert_eq!(state.final_status, FinalStatus::Failed);
        assert!(state.trace_events.is_empty(), "events drained by update_db");
    }
}
