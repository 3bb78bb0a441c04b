// src/pipeline/dispatcher.rs
// RSS / vendor ingest dispatcher: poll due feeds, dedupe, triage, dispatch
//
// Per tick: find due feeds, fetch headline sets, dedupe by (source, url),
// and commit feed bookkeeping BEFORE the slow LLM stages so operational
// progress stays visible even when filtering times out. Fulltext-mode
// feeds skip Layer 1.5 and go straight to Layer 2; standard feeds pass
// through the initial single-stage filter, then Layer 1 scoring, then the
// Layer 1.5 fetch queue.

use crate::db::articles::{insert_article_sync, set_filter_status_sync, ArticleInsert};
use crate::db::articles::{mark_content_fetched_sync, FetchedUpdate};
use crate::db::feeds::{list_due_feeds_sync, record_poll_result_sync};
use crate::db::pool::DatabasePool;
use crate::db::types::{ContentStatus, Feed, FilterStatus};
use crate::content::estimate_word_count;
use crate::feeds::{FeedArticle, FeedSource};
use crate::llm::{ChatMessage, ChatRequest, LlmGateway};
use crate::pipeline::extract_json_object;
use crate::pipeline::fetch::{FetchItem, JobSink, BATCH_CHUNK_SIZE};
use crate::pipeline::scoring::{Layer1ScoringService, RoutingDecision, ScoringArticle};
use crate::pipeline::state::ArticleJob;
use crate::settings::{ProviderResolver, Purpose};
use crate::stats::FilterStats;
use crate::storage::{ContentFile, ContentStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

/// Concurrent feed polls per tick
const FEED_CONCURRENCY: usize = 3;
/// Initial-filter summaries are truncated hard: feeds often ship full
/// article text in the description, which bloats tokens and causes
/// timeouts at scale
const FILTER_SUMMARY_LIMIT: usize = 300;
/// Initial-filter LLM timeout
const INITIAL_FILTER_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Monitor state (admin surface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MonitorProgress {
    pub stage: String,
    pub message: String,
    pub percent: u8,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorRun {
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
}

/// Shared dispatcher status for `GET /admin/news/monitor-status`
#[derive(Debug, Clone, Serialize, Default)]
pub struct MonitorState {
    pub running: bool,
    pub progress: Option<MonitorProgress>,
    pub last_run: Option<MonitorRun>,
    pub next_run_at: Option<DateTime<Utc>>,
}

pub type SharedMonitor = Arc<RwLock<MonitorState>>;

/// Per-run statistics
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct RunStats {
    pub feeds_polled: usize,
    pub feed_errors: usize,
    pub total_new: usize,
    pub fulltext_dispatched: usize,
    pub standard_dispatched: usize,
    pub filter_skipped: usize,
    pub discarded: usize,
    pub two_phase_enabled: bool,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct IngestDispatcher {
    pool: Arc<DatabasePool>,
    source: Arc<dyn FeedSource>,
    gateway: Arc<dyn LlmGateway>,
    resolver: Arc<ProviderResolver>,
    scoring: Arc<Layer1ScoringService>,
    store: Arc<ContentStore>,
    sink: Arc<dyn JobSink>,
    stats: FilterStats,
    monitor: SharedMonitor,
}

/// One feed's poll outcome, before triage
struct PolledFeed {
    feed: Feed,
    new_articles: Vec<(String, FeedArticle)>, // (article_id, payload)
    errored: bool,
}

impl IngestDispatcher {
    pub fn new(
        pool: Arc<DatabasePool>,
        source: Arc<dyn FeedSource>,
        gateway: Arc<dyn LlmGateway>,
        resolver: Arc<ProviderResolver>,
        scoring: Arc<Layer1ScoringService>,
        store: Arc<ContentStore>,
        sink: Arc<dyn JobSink>,
        stats: FilterStats,
        monitor: SharedMonitor,
    ) -> Self {
        Self {
            pool,
            source,
            gateway,
            resolver,
            scoring,
            store,
            sink,
            stats,
            monitor,
        }
    }

    pub fn monitor(&self) -> SharedMonitor {
        self.monitor.clone()
    }

    async fn progress(&self, stage: &str, message: &str, percent: u8) {
        let mut monitor = self.monitor.write().await;
        monitor.running = true;
        monitor.progress = Some(MonitorProgress {
            stage: stage.to_string(),
            message: message.to_string(),
            percent,
            updated_at: Utc::now(),
        });
    }

    async fn finish(&self, stats: RunStats) {
        let mut monitor = self.monitor.write().await;
        monitor.running = false;
        monitor.progress = None;
        monitor.last_run = Some(MonitorRun {
            finished_at: Utc::now(),
            stats,
        });
    }

    /// One dispatcher run: poll, dedupe, triage, dispatch.
    pub async fn run_once(&self) -> RunStats {
        info!("ingest dispatcher run starting");
        self.progress("init", "initializing dispatcher run", 0).await;

        let mut stats = RunStats {
            two_phase_enabled: self.resolver.use_two_phase_filter().await,
            ..Default::default()
        };

        let due = self
            .pool
            .try_interact("list due feeds", list_due_feeds_sync)
            .await
            .unwrap_or_default();

        if due.is_empty() {
            info!("no feeds due for polling");
            self.finish(stats).await;
            return stats;
        }

        self.progress("polling", &format!("polling {} due feeds", due.len()), 10)
            .await;

        // Poll feeds under a small concurrency bound
        let semaphore = Arc::new(Semaphore::new(FEED_CONCURRENCY));
        let mut handles = Vec::with_capacity(due.len());
        for feed in due {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let source = self.source.clone();
            let pool = self.pool.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                poll_one_feed(pool, source, feed).await
            }));
        }

        let mut fulltext: Vec<(String, FeedArticle)> = Vec::new();
        let mut standard: Vec<(String, FeedArticle)> = Vec::new();

        for handle in handles {
            let Ok(polled) = handle.await else {
                stats.feed_errors += 1;
                continue;
            };
            stats.feeds_polled += 1;
            if polled.errored {
                stats.feed_errors += 1;
            }
            stats.total_new += polled.new_articles.len();

            // Feed bookkeeping is committed per-feed inside poll_one_feed,
            // before any LLM work below.
            if polled.feed.fulltext_mode {
                fulltext.extend(polled.new_articles);
            } else {
                standard.extend(polled.new_articles);
            }
        }

        // Fulltext-mode: content already in the payload, skip Layer 1.5
        stats.fulltext_dispatched = self
            .dispatch_fulltext(fulltext, stats.two_phase_enabled)
            .await;

        // Standard: initial filter -> Layer 1 scoring -> Layer 1.5 chunks
        self.progress(
            "filtering",
            &format!("filtering {} articles", standard.len()),
            40,
        )
        .await;

        let standard = if stats.two_phase_enabled && !standard.is_empty() {
            self.apply_initial_filter(standard, &mut stats).await
        } else {
            standard
        };

        self.progress(
            "scoring",
            &format!("scoring {} articles", standard.len()),
            60,
        )
        .await;
        let dispatched = self.score_and_dispatch(standard, &mut stats).await;
        stats.standard_dispatched = dispatched;

        self.progress("dispatch", "dispatch complete", 95).await;
        self.finish(stats).await;

        info!(
            feeds = stats.feeds_polled,
            new = stats.total_new,
            fulltext = stats.fulltext_dispatched,
            standard = stats.standard_dispatched,
            skipped = stats.filter_skipped,
            discarded = stats.discarded,
            errors = stats.feed_errors,
            "ingest dispatcher run completed"
        );
        stats
    }

    /// Persist fulltext payloads and enqueue Layer-2 jobs directly
    async fn dispatch_fulltext(
        &self,
        articles: Vec<(String, FeedArticle)>,
        two_phase: bool,
    ) -> usize {
        let mut jobs = Vec::new();
        for (article_id, article) in articles {
            let Some(content_text) = article.content.clone() else {
                continue;
            };

            let payload = ContentFile {
                url: article.url.clone(),
                title: article.title.clone(),
                word_count: estimate_word_count(&content_text),
                full_text: content_text,
                fetched_at: Some(Utc::now()),
                source: Some("feed".into()),
                ..Default::default()
            };

            let published_at = article
                .published_at
                .as_deref()
                .and_then(|p| p.parse::<DateTime<Utc>>().ok());

            let file_path = match self.store.save(
                &article_id,
                article.symbol.as_deref(),
                &payload,
                published_at,
            ) {
                Ok(path) => path,
                Err(e) => {
                    warn!(article_id = %article_id, "fulltext save failed: {e}");
                    continue;
                }
            };

            let id_for_update = article_id.clone();
            let path_for_update = file_path.clone();
            let word_count = payload.word_count;
            self.pool
                .try_interact("mark fulltext fetched", move |conn| {
                    mark_content_fetched_sync(
                        conn,
                        &FetchedUpdate {
                            article_id: &id_for_update,
                            file_path: &path_for_update,
                            status: ContentStatus::Fetched,
                            language: None,
                            authors: None,
                            keywords: None,
                            top_image: None,
                            word_count,
                        },
                    )
                })
                .await;

            jobs.push(ArticleJob {
                article_id,
                url: article.url,
                market: article.market,
                symbol: article.symbol.unwrap_or_default(),
                title: article.title,
                summary: article.summary.unwrap_or_default(),
                source: "feed".into(),
                published_at: article.published_at,
                use_two_phase: two_phase,
                file_path: Some(file_path),
            });
        }

        let count = jobs.len();
        for chunk in jobs.chunks(BATCH_CHUNK_SIZE) {
            self.sink.enqueue_articles(chunk.to_vec()).await;
        }
        count
    }

    /// Token-efficient initial filter over title + short summary.
    ///
    /// Drops obvious skips before the heavier scoring stage. On any failure
    /// every article is treated as uncertain: nothing is dropped.
    async fn apply_initial_filter(
        &self,
        articles: Vec<(String, FeedArticle)>,
        stats: &mut RunStats,
    ) -> Vec<(String, FeedArticle)> {
        let decisions = match self.run_initial_filter(&articles).await {
            Ok(decisions) => decisions,
            Err(e) => {
                warn!("initial filter failed, proceeding without: {e}");
                Vec::new()
            }
        };

        let mut kept = Vec::with_capacity(articles.len());
        for (idx, (article_id, article)) in articles.into_iter().enumerate() {
            let decision = decisions.get(idx).map(String::as_str).unwrap_or("uncertain");
            let status = match decision {
                "useful" => FilterStatus::Useful,
                "skip" => FilterStatus::Skipped,
                _ => FilterStatus::Uncertain,
            };

            let id_for_update = article_id.clone();
            self.pool
                .try_interact("set filter status", move |conn| {
                    set_filter_status_sync(conn, &id_for_update, status)
                })
                .await;

            if status == FilterStatus::Skipped {
                stats.filter_skipped += 1;
                self.stats.increment("initial_skip").await;
            } else {
                self.stats
                    .increment(if status == FilterStatus::Useful {
                        "initial_useful"
                    } else {
                        "initial_uncertain"
                    })
                    .await;
                kept.push((article_id, article));
            }
        }
        kept
    }

    async fn run_initial_filter(
        &self,
        articles: &[(String, FeedArticle)],
    ) -> crate::Result<Vec<String>> {
        let model = self.resolver.resolve(Purpose::NewsFilter).await?;

        let listing: Vec<String> = articles
            .iter()
            .enumerate()
            .map(|(idx, (_, article))| {
                let summary: String = article
                    .summary
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(FILTER_SUMMARY_LIMIT)
                    .collect();
                format!("[{}] {}\n{}", idx + 1, article.title, summary)
            })
            .collect();

        let request = ChatRequest::new(vec![
            ChatMessage::system(
                "你是新闻初筛过滤器。对每条新闻标题判断其对投资研究的价值，\
                 返回 JSON：{\"1\": \"useful\"|\"uncertain\"|\"skip\", ...}。\
                 只有明显无价值的内容（广告、娱乐、与市场无关）才标记 skip。",
            ),
            ChatMessage::user(listing.join("\n\n")),
        ])
        .json_object()
        .with_temperature(0.1)
        .with_max_tokens((articles.len() as u32 * 10).max(500))
        .with_timeout(INITIAL_FILTER_TIMEOUT_SECS);

        let response = self.gateway.chat(&model, request).await?;
        if let Some(usage) = response.usage {
            self.stats
                .track_tokens("initial_filter", usage.prompt_tokens, usage.completion_tokens)
                .await;
        }

        let parsed = extract_json_object(&response.content.unwrap_or_default());
        Ok((1..=articles.len())
            .map(|idx| {
                parsed
                    .get(&idx.to_string())
                    .and_then(|v| v.as_str())
                    .unwrap_or("uncertain")
                    .to_string()
            })
            .collect())
    }

    /// Layer 1 scoring; discard drops, the rest flows into Layer 1.5 chunks
    async fn score_and_dispatch(
        &self,
        articles: Vec<(String, FeedArticle)>,
        stats: &mut RunStats,
    ) -> usize {
        if articles.is_empty() {
            return 0;
        }

        let scoring_input: Vec<ScoringArticle> = articles
            .iter()
            .map(|(_, article)| ScoringArticle {
                url: article.url.clone(),
                title: article.title.clone(),
                text: article.summary.clone().unwrap_or_default(),
            })
            .collect();

        let results = self
            .scoring
            .batch_score(&scoring_input, crate::pipeline::scoring::DEFAULT_BATCH_SIZE)
            .await;

        let mut items = Vec::new();
        for ((article_id, article), result) in articles.into_iter().zip(results) {
            if result.routing == RoutingDecision::Discard {
                stats.discarded += 1;
                let id_for_update = article_id.clone();
                self.pool
                    .try_interact("mark discarded", move |conn| {
                        set_filter_status_sync(conn, &id_for_update, FilterStatus::Skipped)
                    })
                    .await;
                continue;
            }

            items.push(FetchItem {
                article_id,
                url: article.url,
                symbol: article.symbol.unwrap_or_default(),
                market: article.market,
                title: article.title,
                summary: article.summary.unwrap_or_default(),
                source: "feed".into(),
                published_at: article.published_at,
                use_two_phase: result.routing == RoutingDecision::FullAnalysis,
                decision: result.routing,
            });
        }

        let count = items.len();
        for chunk in items.chunks(BATCH_CHUNK_SIZE) {
            self.sink.enqueue_fetch(chunk.to_vec()).await;
        }
        count
    }
}

/// Poll one feed: fetch headlines, dedupe into article rows, and commit the
/// feed's bookkeeping immediately.
async fn poll_one_feed(
    pool: Arc<DatabasePool>,
    source: Arc<dyn FeedSource>,
    feed: Feed,
) -> PolledFeed {
    let feed_source_name = feed
        .route
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("feed")
        .to_string();

    let fetched = source.fetch_feed(&feed.route).await;

    let (new_articles, errored) = match fetched {
        Ok(articles) => {
            let mut new_articles = Vec::new();
            for article in articles {
                let article_id = uuid::Uuid::new_v4().to_string();
                let inserted = {
                    let id = article_id.clone();
                    let source_name = feed_source_name.clone();
                    let article = article.clone();
                    pool.try_interact("insert article", move |conn| {
                        insert_article_sync(
                            conn,
                            &ArticleInsert {
                                id: &id,
                                source: &source_name,
                                url: &article.url,
                                title: &article.title,
                                summary: article.summary.as_deref(),
                                symbol: article.symbol.as_deref(),
                                market: &article.market,
                                published_at: article.published_at.as_deref(),
                            },
                        )
                    })
                    .await
                    .unwrap_or(false)
                };
                if inserted {
                    new_articles.push((article_id, article));
                }
            }
            (new_articles, false)
        }
        Err(e) => {
            warn!(route = %feed.route, "feed poll failed: {e}");
            (Vec::new(), true)
        }
    };

    // Early commit of feed bookkeeping, before the slow filter stages
    let feed_id = feed.id;
    let count = new_articles.len() as i64;
    pool.try_interact("record poll result", move |conn| {
        record_poll_result_sync(conn, feed_id, count, errored)
    })
    .await;

    PolledFeed {
        feed,
        new_articles,
        errored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::articles::get_article_sync;
    use crate::db::feeds::insert_feed_sync;
    use crate::db::settings::{set_assignment_sync, set_setting_sync, LlmAssignmentRow};
    use crate::error::KingfisherError;
    use crate::llm::testing::MockGateway;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    struct StaticFeedSource {
        articles: Vec<FeedArticle>,
        fail_routes: Vec<&'static str>,
    }

    #[async_trait]
    impl FeedSource for StaticFeedSource {
        async fn fetch_feed(&self, route: &str) -> crate::Result<Vec<FeedArticle>> {
            if self.fail_routes.iter().any(|r| route.contains(r)) {
                return Err(KingfisherError::Fetch("hub unavailable".into()));
            }
            Ok(self.articles.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        articles: Mutex<Vec<ArticleJob>>,
        fetches: Mutex<Vec<FetchItem>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn enqueue_articles(&self, jobs: Vec<ArticleJob>) {
            self.articles.lock().await.extend(jobs);
        }

        async fn enqueue_fetch(&self, items: Vec<FetchItem>) {
            self.fetches.lock().await.extend(items);
        }
    }

    fn feed_article(url: &str, title: &str) -> FeedArticle {
        FeedArticle {
            url: url.into(),
            title: title.into(),
            summary: Some("summary text".into()),
            market: "US".into(),
            ..Default::default()
        }
    }

    struct Setup {
        dispatcher: IngestDispatcher,
        pool: Arc<DatabasePool>,
        sink: Arc<RecordingSink>,
        _dir: TempDir,
    }

    async fn setup(source: StaticFeedSource, gateway: MockGateway, two_phase: bool) -> Setup {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        pool.interact(move |conn| {
            for purpose in ["layer1_scoring", "news_filter"] {
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
            set_setting_sync(conn, "use_two_phase_filter", if two_phase { "true" } else { "false" })
        })
        .await
        .expect("seed");

        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ContentStore::new(dir.path()));
        let gateway: Arc<dyn LlmGateway> = Arc::new(gateway);
        let resolver = Arc::new(ProviderResolver::new(pool.clone()));
        let stats = FilterStats::new(pool.clone());
        let scoring = Arc::new(Layer1ScoringService::new(
            gateway.clone(),
            resolver.clone(),
            stats.clone(),
        ));
        let sink = Arc::new(RecordingSink::default());

        let dispatcher = IngestDispatcher::new(
            pool.clone(),
            Arc::new(source),
            gateway,
            resolver,
            scoring,
            store,
            sink.clone(),
            stats,
            Arc::new(RwLock::new(MonitorState::default())),
        );

        Setup {
            dispatcher,
            pool,
            sink,
            _dir: dir,
        }
    }

    /// Scoring agents reply high enough for the lightweight path
    fn scoring_gateway() -> MockGateway {
        MockGateway::new()
            .reply("宏观视角", r#"{"1": {"tier": "重要", "score": 50}}"#)
            .reply("市场视角", r#"{"1": {"tier": "重要", "score": 50}}"#)
            .reply("信息质量", r#"{"1": {"tier": "中等", "score": 50}}"#)
    }

    #[tokio::test]
    async fn test_poll_dedupes_and_dispatches_standard_feed() {
        let source = StaticFeedSource {
            articles: vec![
                feed_article("https://x/1", "Markets rally on data"),
                feed_article("https://x/1", "Duplicate url"),
                feed_article("https://x/2", "Second story"),
            ],
            fail_routes: vec![],
        };
        let gateway = scoring_gateway()
            .reply("新闻初筛", "unused") // placeholder, two_phase off
            ;
        let setup = setup(source, gateway, false).await;
        setup
            .pool
            .interact(|conn| insert_feed_sync(conn, "/wsj/markets", "market", 30, false).map(|_| ()))
            .await
            .expect("feed");

        let stats = setup.dispatcher.run_once().await;
        assert_eq!(stats.feeds_polled, 1);
        assert_eq!(stats.total_new, 2, "duplicate url deduped");
        // Scores of 150 => lightweight => dispatched to Layer 1.5
        assert_eq!(stats.standard_dispatched, 2);

        let fetches = setup.sink.fetches.lock().await;
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[0].decision, RoutingDecision::Lightweight);
        assert!(!fetches[0].use_two_phase);
    }

    #[tokio::test]
    async fn test_feed_error_bumps_consecutive_errors() {
        let source = StaticFeedSource {
            articles: vec![],
            fail_routes: vec!["broken"],
        };
        let setup = setup(source, scoring_gateway(), false).await;
        let feed_id = setup
            .pool
            .interact(|conn| insert_feed_sync(conn, "/broken/feed", "market", 30, false))
            .await
            .expect("feed");

        let stats = setup.dispatcher.run_once().await;
        assert_eq!(stats.feed_errors, 1);

        let errors: i64 = setup
            .pool
            .interact(move |conn| {
                conn.query_row(
                    "SELECT consecutive_errors FROM feeds WHERE id = ?",
                    [feed_id],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .expect("query");
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_fulltext_feed_skips_layer15() {
        let source = StaticFeedSource {
            articles: vec![FeedArticle {
                content: Some("The complete article body shipped in the feed payload.".into()),
                ..feed_article("https://x/full", "Fulltext story")
            }],
            fail_routes: vec![],
        };
        let setup = setup(source, scoring_gateway(), false).await;
        setup
            .pool
            .interact(|conn| insert_feed_sync(conn, "/hub/full", "market", 30, true).map(|_| ()))
            .await
            .expect("feed");

        let stats = setup.dispatcher.run_once().await;
        assert_eq!(stats.fulltext_dispatched, 1);
        assert_eq!(stats.standard_dispatched, 0);

        let articles = setup.sink.articles.lock().await;
        assert_eq!(articles.len(), 1);
        assert!(articles[0].file_path.is_some(), "content persisted up front");
        assert!(setup.sink.fetches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_initial_filter_drops_skips() {
        let source = StaticFeedSource {
            articles: vec![
                feed_article("https://x/1", "Fed policy decision due"),
                feed_article("https://x/2", "Celebrity gossip roundup"),
            ],
            fail_routes: vec![],
        };
        let gateway = MockGateway::new()
            // Initial filter: first useful, second skip
            .reply("[2] Celebrity", r#"{"1": "useful", "2": "skip"}"#)
            .reply("宏观视角", r#"{"1": {"tier": "重要", "score": 50}}"#)
            .reply("市场视角", r#"{"1": {"tier": "重要", "score": 50}}"#)
            .reply("信息质量", r#"{"1": {"tier": "中等", "score": 50}}"#);
        let setup = setup(source, gateway, true).await;
        setup
            .pool
            .interact(|conn| insert_feed_sync(conn, "/wsj/markets", "market", 30, false).map(|_| ()))
            .await
            .expect("feed");

        let stats = setup.dispatcher.run_once().await;
        assert_eq!(stats.filter_skipped, 1);
        assert_eq!(stats.standard_dispatched, 1);

        // The skipped article's row is marked
        let skipped = setup
            .pool
            .interact(|conn| {
                let id: String = conn.query_row(
                    "SELECT id FROM articles WHERE url = 'https://x/2'",
                    [],
                    |row| row.get(0),
                )?;
                get_article_sync(conn, &id)
            })
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(skipped.filter_status, FilterStatus::Skipped);
    }

    #[tokio::test]
    async fn test_discarded_articles_never_reach_fetch() {
        let source = StaticFeedSource {
            articles: vec![feed_article("https://x/1", "Low value noise")],
            fail_routes: vec![],
        };
        let gateway = MockGateway::new()
            .reply("宏观视角", r#"{"1": {"tier": "无关", "score": 5}}"#)
            .reply("市场视角", r#"{"1": {"tier": "无关", "score": 5}}"#)
            .reply("信息质量", r#"{"1": {"tier": "噪音", "score": 5}}"#);
        let setup = setup(source, gateway, false).await;
        setup
            .pool
            .interact(|conn| insert_feed_sync(conn, "/wsj/markets", "market", 30, false).map(|_| ()))
            .await
            .expect("feed");

        let stats = setup.dispatcher.run_once().await;
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.standard_dispatched, 0);
        assert!(setup.sink.fetches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_state_reflects_run() {
        let source = StaticFeedSource {
            articles: vec![],
            fail_routes: vec![],
        };
        let setup = setup(source, scoring_gateway(), false).await;

        let monitor = setup.dispatcher.monitor();
        setup.dispatcher.run_once().await;

        let state = monitor.read().await;
        assert!(!state.running);
        assert!(state.progress.is_none());
        assert!(state.last_run.is_some());
    }
}
