// src/stats.rs
// Best-effort counters and token aggregates for dashboards

use crate::db::pool::DatabasePool;
use crate::db::stats::{increment_counter_sync, track_tokens_sync};
use std::sync::Arc;

/// Process-wide filter statistics client.
///
/// Every write is best-effort: a failed increment is logged at debug level
/// and never propagates into pipeline control flow. Dashboard reads are
/// non-transactional snapshots; missing counters read as zero.
#[derive(Clone)]
pub struct FilterStats {
    pool: Arc<DatabasePool>,
}

impl FilterStats {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Increment a named counter by one
    pub async fn increment(&self, name: &str) {
        self.increment_by(name, 1).await;
    }

    /// Increment a named counter
    pub async fn increment_by(&self, name: &str, by: i64) {
        let name = name.to_string();
        self.pool
            .try_interact("stats increment", move |conn| {
                increment_counter_sync(conn, &name, by)
            })
            .await;
    }

    /// Add token usage for a pipeline stage
    pub async fn track_tokens(&self, stage: &str, input_tokens: u32, output_tokens: u32) {
        let stage = stage.to_string();
        self.pool
            .try_interact("stats track_tokens", move |conn| {
                track_tokens_sync(conn, &stage, i64::from(input_tokens), i64::from(output_tokens))
            })
            .await;
    }
}
