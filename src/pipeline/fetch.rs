// src/pipeline/fetch.rs
// Layer 1.5: provider-chain content fetch, persistence, Layer-2 dispatch

use crate::content::ProviderChain;
use crate::db::articles::{
    get_content_status_sync, mark_content_failed_sync, mark_content_fetched_sync, FetchedUpdate,
};
use crate::db::pool::DatabasePool;
use crate::db::trace::{record_event_sync, TraceEvent};
use crate::db::types::ContentStatus;
use crate::pipeline::scoring::RoutingDecision;
use crate::pipeline::state::ArticleJob;
use crate::stats::FilterStats;
use crate::storage::{ContentFile, ContentStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Layer-2 jobs are dispatched to the queue in chunks of this size so
/// downstream workers get steady, bounded load
pub const BATCH_CHUNK_SIZE: usize = 10;
/// Concurrent fetches within one chunk
const FETCH_CONCURRENCY: usize = 5;

/// The minimum Layer-1 output needed to drive Layer 2
#[derive(Debug, Clone)]
pub struct FetchItem {
    pub article_id: String,
    pub url: String,
    pub symbol: String,
    pub market: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub published_at: Option<String>,
    /// Layer 1 routing decision carried through to Layer 2
    pub decision: RoutingDecision,
    /// Deep (two-phase) vs legacy filter in Layer 2
    pub use_two_phase: bool,
}

/// Where pipeline work is enqueued: Layer-1.5 fetch batches land on the
/// scrape queue, per-article Layer-2 jobs on the LLM queue.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn enqueue_articles(&self, jobs: Vec<ArticleJob>);

    async fn enqueue_fetch(&self, items: Vec<FetchItem>);
}

/// Outcome summary of one batch_fetch call
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct ContentFetcher {
    pool: Arc<DatabasePool>,
    store: Arc<ContentStore>,
    chain: Arc<ProviderChain>,
    sink: Arc<dyn JobSink>,
    stats: FilterStats,
}

impl ContentFetcher {
    pub fn new(
        pool: Arc<DatabasePool>,
        store: Arc<ContentStore>,
        chain: Arc<ProviderChain>,
        sink: Arc<dyn JobSink>,
        stats: FilterStats,
    ) -> Self {
        Self {
            pool,
            store,
            chain,
            sink,
            stats,
        }
    }

    /// Fetch content for a batch of items and enqueue the successes into
    /// Layer 2 in chunks. Fetches within the batch run concurrently under a
    /// bounded semaphore; per-item failures never fail the batch.
    pub async fn batch_fetch(&self, items: Vec<FetchItem>) -> FetchSummary {
        if items.is_empty() {
            return FetchSummary::default();
        }

        let mut summary = FetchSummary {
            total: items.len(),
            ..Default::default()
        };
        info!(items = items.len(), "Layer 1.5 batch fetch starting");

        let semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { break };
            let fetcher = self.clone_parts();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                fetcher.fetch_one(item).await
            }));
        }

        let mut jobs = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(Some(job))) => {
                    summary.success += 1;
                    jobs.push(job);
                }
                Ok(Ok(None)) => summary.skipped += 1,
                Ok(Err(())) => summary.failed += 1,
                Err(e) => {
                    warn!("fetch task panicked: {e}");
                    summary.failed += 1;
                }
            }
        }

        // Dispatch in fixed-size chunks for steady downstream load
        for chunk in jobs.chunks(BATCH_CHUNK_SIZE) {
            self.sink.enqueue_articles(chunk.to_vec()).await;
        }

        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            "Layer 1.5 batch fetch completed"
        );
        summary
    }

    fn clone_parts(&self) -> FetchWorker {
        FetchWorker {
            pool: self.pool.clone(),
            store: self.store.clone(),
            chain: self.chain.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// Per-task slice of the fetcher (no sink; jobs return to the caller)
struct FetchWorker {
    pool: Arc<DatabasePool>,
    store: Arc<ContentStore>,
    chain: Arc<ProviderChain>,
    stats: FilterStats,
}

impl FetchWorker {
    /// Fetch one article. Ok(Some(job)) on success, Ok(None) when skipped,
    /// Err(()) on fetch failure (already recorded on the article row).
    async fn fetch_one(&self, item: FetchItem) -> Result<Option<ArticleJob>, ()> {
        let t0 = Instant::now();
        let article_id = item.article_id.clone();

        // Idempotent retry guard: don't re-fetch processed articles
        let id_for_status = article_id.clone();
        let current = self
            .pool
            .try_interact("read content_status", move |conn| {
                get_content_status_sync(conn, &id_for_status)
            })
            .await
            .flatten();
        match current {
            None => {
                warn!(article_id = %article_id, "fetch: article row not found");
                return Ok(None);
            }
            Some(status) if status.is_fetch_terminal() => {
                info!(article_id = %article_id, status = status.as_str(), "fetch: already processed");
                return Ok(None);
            }
            _ => {}
        }

        let language = market_language(&item.market);

        match self.chain.fetch_with_fallback(&item.url, language).await {
            Ok(content) => {
                let status = if content.is_partial {
                    ContentStatus::Partial
                } else {
                    ContentStatus::Fetched
                };

                let payload = ContentFile {
                    url: item.url.clone(),
                    title: content.title.clone().unwrap_or_else(|| item.title.clone()),
                    full_text: content.full_text,
                    word_count: content.word_count,
                    language: content.language.clone(),
                    authors: content.authors.clone(),
                    keywords: content.keywords.clone(),
                    top_image: content.top_image.clone(),
                    fetched_at: Some(Utc::now()),
                    source: Some(content.provider.to_string()),
                    metadata: serde_json::json!({"provider": content.provider}),
                };

                let published_at = item
                    .published_at
                    .as_deref()
                    .and_then(|p| p.parse::<DateTime<Utc>>().ok());

                let file_path = match self.store.save(
                    &article_id,
                    Some(&item.symbol).filter(|s| !s.is_empty()).map(|s| s.as_str()),
                    &payload,
                    published_at,
                ) {
                    Ok(path) => path,
                    Err(e) => {
                        self.record_failure(&item, &format!("storage error: {e}"), t0).await;
                        return Err(());
                    }
                };

                let update_id = article_id.clone();
                let path_for_update = file_path.clone();
                let language_owned = content.language.clone();
                let authors = payload.authors.clone();
                let keywords = payload.keywords.clone();
                let top_image = payload.top_image.clone();
                let word_count = payload.word_count;
                let updated = self
                    .pool
                    .interact(move |conn| {
                        mark_content_fetched_sync(
                            conn,
                            &FetchedUpdate {
                                article_id: &update_id,
                                file_path: &path_for_update,
                                status,
                                language: language_owned.as_deref(),
                                authors: Some(&authors),
                                keywords: Some(&keywords),
                                top_image: top_image.as_deref(),
                                word_count,
                            },
                        )
                    })
                    .await;
                if let Err(e) = updated {
                    warn!(article_id = %article_id, "fetch: row update failed: {e}");
                }

                self.stats.increment("layer15_fetch_success").await;
                self.stats
                    .increment(&format!("layer15_provider_{}", content.provider))
                    .await;
                self.record_trace(TraceEvent::success(
                    &article_id,
                    "1.5",
                    "fetch",
                    elapsed_ms(t0),
                    Some(serde_json::json!({
                        "provider": content.provider,
                        "word_count": word_count,
                        "partial": content.is_partial,
                        "decision": item.decision.as_str(),
                    })),
                ))
                .await;

                Ok(Some(ArticleJob {
                    article_id,
                    url: item.url,
                    market: item.market,
                    symbol: item.symbol,
                    title: item.title,
                    summary: item.summary,
                    source: item.source,
                    published_at: item.published_at,
                    use_two_phase: item.use_two_phase,
                    file_path: Some(file_path),
                }))
            }
            Err(e) => {
                self.record_failure(&item, &e.to_string(), t0).await;
                Err(())
            }
        }
    }

    /// Mark the article failed/blocked and trace the error. No Layer-2 job.
    async fn record_failure(&self, item: &FetchItem, error: &str, t0: Instant) {
        let status = if error.to_lowercase().contains("blocked") {
            ContentStatus::Blocked
        } else {
            ContentStatus::Failed
        };

        warn!(
            article_id = %item.article_id,
            status = status.as_str(),
            "fetch failed: {error}"
        );

        let id = item.article_id.clone();
        let error_owned = error.to_string();
        self.pool
            .try_interact("mark content failed", move |conn| {
                mark_content_failed_sync(conn, &id, status, &error_owned)
            })
            .await;

        self.stats.increment("layer15_fetch_error").await;
        self.record_trace(TraceEvent::error(
            &item.article_id,
            "1.5",
            "fetch",
            elapsed_ms(t0),
            error,
        ))
        .await;
    }

    async fn record_trace(&self, event: TraceEvent) {
        self.pool
            .try_interact("record fetch trace", move |conn| {
                record_event_sync(conn, &event)
            })
            .await;
    }
}

fn elapsed_ms(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}

/// Language hint for extraction. HK sources publish in English; only the
/// mainland markets are zh.
fn market_language(market: &str) -> &'static str {
    if matches!(market, "SH" | "SZ") {
        "zh"
    } else {
        "en"
    }
}
