// src/worker/mod.rs
// In-process worker pool: bounded queues, retry at the worker boundary

pub mod sweep;

use crate::pipeline::dispatcher::IngestDispatcher;
use crate::pipeline::fetch::{ContentFetcher, FetchItem, JobSink};
use crate::pipeline::state::ArticleJob;
use crate::pipeline::workflow::ArticleWorkflow;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{info, warn};

/// Queue capacity per worker queue
const QUEUE_CAPACITY: usize = 512;
/// Soft wall-clock limit per job
const JOB_TIMEOUT: Duration = Duration::from_secs(240);
/// Worker-boundary retries per job (no node-level retries anywhere)
const MAX_RETRIES: u32 = 3;
/// Base backoff between retries (doubles each attempt)
const RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded job queues shared by the dispatcher and Layer 1.5.
///
/// Two queues keep I/O-bound fetching from crowding out LLM work: `scrape`
/// carries Layer 1.5 fetch batches, `llm` carries per-article Layer 2 jobs.
pub struct WorkerPool {
    scrape_tx: mpsc::Sender<Vec<FetchItem>>,
    llm_tx: mpsc::Sender<ArticleJob>,
}

pub struct WorkerReceivers {
    scrape_rx: mpsc::Receiver<Vec<FetchItem>>,
    llm_rx: mpsc::Receiver<ArticleJob>,
}

impl WorkerPool {
    /// Create the queues. Receivers go to `spawn_workers` once the fetcher
    /// and workflow exist (they hold the pool as their sink).
    pub fn new() -> (Arc<Self>, WorkerReceivers) {
        let (scrape_tx, scrape_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (llm_tx, llm_rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Arc::new(Self { scrape_tx, llm_tx }),
            WorkerReceivers { scrape_rx, llm_rx },
        )
    }

    /// Spawn the per-queue worker tasks
    pub fn spawn_workers(
        receivers: WorkerReceivers,
        fetcher: Arc<ContentFetcher>,
        workflow: Arc<ArticleWorkflow>,
        scrape_workers: usize,
        llm_workers: usize,
    ) {
        let scrape_rx = Arc::new(Mutex::new(receivers.scrape_rx));
        for worker_id in 0..scrape_workers.max(1) {
            let rx = scrape_rx.clone();
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                loop {
                    let batch = { rx.lock().await.recv().await };
                    let Some(batch) = batch else { break };
                    run_with_retry(&format!("scrape[{worker_id}]"), || {
                        let fetcher = fetcher.clone();
                        let batch = batch.clone();
                        async move {
                            fetcher.batch_fetch(batch).await;
                        }
                    })
                    .await;
                }
                info!(worker_id, "scrape worker stopped");
            });
        }

        let llm_rx = Arc::new(Mutex::new(receivers.llm_rx));
        for worker_id in 0..llm_workers.max(1) {
            let rx = llm_rx.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    run_with_retry(&format!("llm[{worker_id}]"), || {
                        let workflow = workflow.clone();
                        let job = job.clone();
                        async move {
                            workflow.run(job).await;
                        }
                    })
                    .await;
                }
                info!(worker_id, "llm worker stopped");
            });
        }
    }
}

#[async_trait]
impl JobSink for WorkerPool {
    async fn enqueue_articles(&self, jobs: Vec<ArticleJob>) {
        for job in jobs {
            if let Err(e) = self.llm_tx.send(job).await {
                warn!("llm queue closed, dropping job: {e}");
            }
        }
    }

    async fn enqueue_fetch(&self, items: Vec<FetchItem>) {
        if let Err(e) = self.scrape_tx.send(items).await {
            warn!("scrape queue closed, dropping batch: {e}");
        }
    }
}

/// Run a job under the wall-clock limit, retrying on timeout with
/// exponential backoff. Jobs themselves never raise; the only worker-level
/// failure is exceeding the time limit.
async fn run_with_retry<F, Fut>(label: &str, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut backoff = RETRY_BACKOFF;
    for attempt in 0..=MAX_RETRIES {
        match tokio::time::timeout(JOB_TIMEOUT, job()).await {
            Ok(()) => return,
            Err(_) => {
                if attempt == MAX_RETRIES {
                    warn!(label, "job timed out after {} attempts, giving up", attempt + 1);
                    return;
                }
                warn!(label, attempt, "job timed out, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

/// Manual-trigger handle for the dispatch scheduler
#[derive(Clone)]
pub struct DispatchTrigger {
    notify: Arc<Notify>,
}

impl DispatchTrigger {
    pub fn fire(&self) {
        self.notify.notify_one();
    }
}

/// Run the dispatcher on a fixed tick, with a manual trigger for the admin
/// surface. The tick re-arms only after the previous run finishes.
pub fn spawn_dispatch_loop(
    dispatcher: Arc<IngestDispatcher>,
    tick_minutes: u64,
) -> DispatchTrigger {
    let notify = Arc::new(Notify::new());
    let trigger = DispatchTrigger {
        notify: notify.clone(),
    };

    tokio::spawn(async move {
        let tick = Duration::from_secs(tick_minutes.max(1) * 60);
        loop {
            {
                let monitor = dispatcher.monitor();
                let mut state = monitor.write().await;
                state.next_run_at = Some(
                    chrono::Utc::now()
                        + chrono::Duration::from_std(tick)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = notify.notified() => {
                    info!("manual dispatcher trigger received");
                }
            }

            dispatcher.run_once().await;
        }
    });

    trigger
}
