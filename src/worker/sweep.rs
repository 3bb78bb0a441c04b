// src/worker/sweep.rs
// Retention sweeps: content files, orphaned files, trace events, vectors

use crate::db::articles::{clear_content_file_sync, get_content_status_sync, list_sweepable_articles_sync};
use crate::db::pool::DatabasePool;
use crate::db::trace::sweep_events_sync;
use crate::db::types::ContentStatus;
use crate::db::vectors::delete_vectors_sync;
use crate::storage::ContentStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Articles examined per sweep pass
const SWEEP_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    pub files_deleted: usize,
    pub orphan_files_deleted: usize,
    pub vectors_deleted: usize,
    pub trace_events_deleted: usize,
    pub errors: usize,
}

/// One retention pass.
///
/// Content files are deleted only when old enough AND the owning article is
/// in a non-live status (deleted/failed/blocked) or absent. Vectors of
/// swept articles go with the files; trace events age out on their own
/// window.
pub async fn run_retention_sweep(
    pool: &Arc<DatabasePool>,
    store: &Arc<ContentStore>,
    content_retention_days: u32,
    trace_retention_days: u32,
) -> SweepStats {
    let mut stats = SweepStats::default();

    // 1. DB-driven sweep: rows in a terminal failure state with a file ref
    let retention = content_retention_days;
    let sweepable = pool
        .try_interact("list sweepable", move |conn| {
            list_sweepable_articles_sync(conn, retention, SWEEP_BATCH)
        })
        .await
        .unwrap_or_default();

    for (article_id, file_path) in sweepable {
        if store.delete(&file_path) {
            stats.files_deleted += 1;
        }
        let id_for_clear = article_id.clone();
        let cleared = pool
            .try_interact("clear file ref", move |conn| {
                clear_content_file_sync(conn, &id_for_clear)?;
                delete_vectors_sync(conn, "news", &id_for_clear)
            })
            .await;
        match cleared {
            Some(vectors) => stats.vectors_deleted += vectors,
            None => stats.errors += 1,
        }
    }

    // 2. Orphan sweep: old files whose owning article is gone or non-live
    match store.list_files_older_than(content_retention_days) {
        Ok(old_files) => {
            for (file_path, article_id) in old_files {
                let id_for_status = article_id.clone();
                let status = pool
                    .try_interact("orphan status", move |conn| {
                        get_content_status_sync(conn, &id_for_status)
                    })
                    .await
                    .flatten();

                let deletable = matches!(
                    status,
                    None | Some(ContentStatus::Deleted)
                        | Some(ContentStatus::Failed)
                        | Some(ContentStatus::Blocked)
                );
                if deletable && store.delete(&file_path) {
                    stats.orphan_files_deleted += 1;
                }
            }
        }
        Err(e) => {
            warn!("orphan file scan failed: {e}");
            stats.errors += 1;
        }
    }

    // 3. Trace retention window
    let trace_days = trace_retention_days;
    match pool
        .try_interact("sweep trace", move |conn| sweep_events_sync(conn, trace_days))
        .await
    {
        Some(deleted) => stats.trace_events_deleted = deleted,
        None => stats.errors += 1,
    }

    info!(
        files = stats.files_deleted,
        orphans = stats.orphan_files_deleted,
        vectors = stats.vectors_deleted,
        trace_events = stats.trace_events_deleted,
        errors = stats.errors,
        "retention sweep completed"
    );
    stats
}

/// Daily sweep loop
pub fn spawn_sweep_loop(
    pool: Arc<DatabasePool>,
    store: Arc<ContentStore>,
    content_retention_days: u32,
    trace_retention_days: u32,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            run_retention_sweep(&pool, &store, content_retention_days, trace_retention_days).await;
        }
    });
}
