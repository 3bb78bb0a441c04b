// src/db/trace.rs
// Append-only pipeline trace store (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, params};
use serde::Serialize;

/// Maximum stored error length
const MAX_ERROR_LEN: usize = 200;

/// One immutable record of a pipeline node execution
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub article_id: String,
    pub layer: String,
    pub node: String,
    /// "success" | "error" | "skip"
    pub status: String,
    pub duration_ms: f64,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TraceEvent {
    /// Build a success event with optional metadata
    pub fn success(
        article_id: &str,
        layer: &str,
        node: &str,
        duration_ms: f64,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            article_id: article_id.to_string(),
            layer: layer.to_string(),
            node: node.to_string(),
            status: "success".into(),
            duration_ms,
            metadata,
            error: None,
        }
    }

    /// Build an error event; the error string is truncated at write time
    pub fn error(article_id: &str, layer: &str, node: &str, duration_ms: f64, error: &str) -> Self {
        Self {
            article_id: article_id.to_string(),
            layer: layer.to_string(),
            node: node.to_string(),
            status: "error".into(),
            duration_ms,
            metadata: None,
            error: Some(truncate_error(error)),
        }
    }
}

fn truncate_error(s: &str) -> String {
    match s.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Append one event
pub fn record_event_sync(conn: &Connection, event: &TraceEvent) -> Result<()> {
    let metadata = event.metadata.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO pipeline_events (article_id, layer, node, status, duration_ms, metadata, error)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            event.article_id,
            event.layer,
            event.node,
            event.status,
            event.duration_ms,
            metadata,
            event.error,
        ],
    )?;
    Ok(())
}

/// Append a batch of events. Caller is expected to hold a transaction when
/// atomicity with other writes matters.
pub fn record_events_sync(conn: &Connection, events: &[TraceEvent]) -> Result<()> {
    for event in events {
        record_event_sync(conn, event)?;
    }
    Ok(())
}

/// Stored event row (query surface)
#[derive(Debug, Clone, Serialize)]
pub struct StoredTraceEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: TraceEvent,
    pub created_at: String,
}

fn stored_event_from_row(row: &rusqlite::Row) -> rusqlite::Result<StoredTraceEvent> {
    let metadata: Option<String> = row.get(6)?;
    Ok(StoredTraceEvent {
        id: row.get(0)?,
        event: TraceEvent {
            article_id: row.get(1)?,
            layer: row.get(2)?,
            node: row.get(3)?,
            status: row.get(4)?,
            duration_ms: row.get(5)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            error: row.get(7)?,
        },
        created_at: row.get(8)?,
    })
}

const EVENT_COLUMNS: &str =
    "id, article_id, layer, node, status, duration_ms, metadata, error, created_at";

/// Ordered trace timeline for one article
pub fn get_article_timeline_sync(conn: &Connection, article_id: &str) -> Result<Vec<StoredTraceEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE article_id = ? ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map([article_id], stored_event_from_row)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Per-(layer, node, status) aggregate over a recent window
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub layer: String,
    pub node: String,
    pub status: String,
    pub count: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
}

pub fn get_node_stats_sync(conn: &Connection, days: u32) -> Result<Vec<NodeStats>> {
    let mut stmt = conn.prepare(
        "SELECT layer, node, status, COUNT(*), AVG(duration_ms), MAX(duration_ms)
         FROM pipeline_events
         WHERE created_at >= datetime('now', ?)
         GROUP BY layer, node, status
         ORDER BY layer, node, status",
    )?;
    let rows = stmt.query_map([format!("-{days} days")], |row| {
        Ok(NodeStats {
            layer: row.get(0)?,
            node: row.get(1)?,
            status: row.get(2)?,
            count: row.get::<_, i64>(3)? as u64,
            avg_duration_ms: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            max_duration_ms: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        })
    })?;
    let mut stats = Vec::new();
    for row in rows {
        stats.push(row?);
    }
    Ok(stats)
}

/// Event search filters (all optional)
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub layer: Option<String>,
    pub node: Option<String>,
    pub status: Option<String>,
    pub days: u32,
    pub limit: usize,
    pub offset: usize,
}

/// Filtered, paginated event search (newest first)
pub fn search_events_sync(conn: &Connection, filter: &EventFilter) -> Result<Vec<StoredTraceEvent>> {
    let mut sql = format!(
        "SELECT {EVENT_COLUMNS} FROM pipeline_events
         WHERE created_at >= datetime('now', ?)"
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(format!("-{} days", filter.days.max(1)))];

    if let Some(ref layer) = filter.layer {
        sql.push_str(" AND layer = ?");
        params_vec.push(Box::new(layer.clone()));
    }
    if let Some(ref node) = filter.node {
        sql.push_str(" AND node = ?");
        params_vec.push(Box::new(node.clone()));
    }
    if let Some(ref status) = filter.status {
        sql.push_str(" AND status = ?");
        params_vec.push(Box::new(status.clone()));
    }

    sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");
    params_vec.push(Box::new(filter.limit.clamp(1, 500) as i64));
    params_vec.push(Box::new(filter.offset as i64));

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), stored_event_from_row)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Delete events older than the retention window. Returns rows deleted.
pub fn sweep_events_sync(conn: &Connection, retention_days: u32) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM pipeline_events WHERE created_at < datetime('now', ?)",
        [format!("-{retention_days} days")],
    )?;
    Ok(deleted)
}
