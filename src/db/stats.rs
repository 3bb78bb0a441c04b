// src/db/stats.rs
// Day-bucketed counters and token aggregates (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::HashMap;

/// Increment a named counter in today's bucket
pub fn increment_counter_sync(conn: &Connection, name: &str, by: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO filter_counters (day, name, value)
         VALUES (date('now'), ?, ?)
         ON CONFLICT(day, name) DO UPDATE SET value = value + excluded.value",
        params![name, by],
    )?;
    Ok(())
}

/// Add token usage for a stage to today's bucket
pub fn track_tokens_sync(
    conn: &Connection,
    stage: &str,
    input_tokens: i64,
    output_tokens: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO token_usage (day, stage, input_tokens, output_tokens, calls)
         VALUES (date('now'), ?, ?, ?, 1)
         ON CONFLICT(day, stage) DO UPDATE SET
            input_tokens = input_tokens + excluded.input_tokens,
            output_tokens = output_tokens + excluded.output_tokens,
            calls = calls + 1",
        params![stage, input_tokens, output_tokens],
    )?;
    Ok(())
}

/// Counter totals over the last N days. Missing counters read as zero.
pub fn get_counter_totals_sync(conn: &Connection, days: u32) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT name, SUM(value) FROM filter_counters
         WHERE day >= date('now', ?)
         GROUP BY name",
    )?;
    let rows = stmt.query_map([format!("-{days} days")], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut totals = HashMap::new();
    for row in rows {
        let (name, value) = row?;
        totals.insert(name, value);
    }
    Ok(totals)
}

/// Counter values grouped by day (for the daily dashboard)
pub fn get_daily_counters_sync(
    conn: &Connection,
    days: u32,
) -> Result<HashMap<String, HashMap<String, i64>>> {
    let mut stmt = conn.prepare(
        "SELECT day, name, value FROM filter_counters
         WHERE day >= date('now', ?)
         ORDER BY day DESC",
    )?;
    let rows = stmt.query_map([format!("-{days} days")], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut daily: HashMap<String, HashMap<String, i64>> = HashMap::new();
    for row in rows {
        let (day, name, value) = row?;
        daily.entry(day).or_default().insert(name, value);
    }
    Ok(daily)
}

/// Per-stage token totals over the last N days
#[derive(Debug, Clone, Serialize)]
pub struct StageTokens {
    pub stage: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub calls: i64,
}

pub fn get_token_totals_sync(conn: &Connection, days: u32) -> Result<Vec<StageTokens>> {
    let mut stmt = conn.prepare(
        "SELECT stage, SUM(input_tokens), SUM(output_tokens), SUM(calls)
         FROM token_usage
         WHERE day >= date('now', ?)
         GROUP BY stage
         ORDER BY stage",
    )?;
    let rows = stmt.query_map([format!("-{days} days")], |row| {
        Ok(StageTokens {
            stage: row.get(0)?,
            input_tokens: row.get(1)?,
            output_tokens: row.get(2)?,
            calls: row.get(3)?,
        })
    })?;
    let mut totals = Vec::new();
    for row in rows {
        totals.push(row?);
    }
    Ok(totals)
}

/// Reset all counters and token aggregates (explicit admin sweep only)
pub fn reset_counters_sync(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM filter_counters", [])?;
    conn.execute("DELETE FROM token_usage", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn test_conn() -> Connection {
        crate::db::pool::ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().expect("open");
        run_all_migrations(&conn).expect("migrate");
        conn
    }

    #[test]
    fn test_counter_increment_accumulates() {
        let conn = test_conn();
        increment_counter_sync(&conn, "layer1_discard", 1).expect("inc");
        increment_counter_sync(&conn, "layer1_discard", 1).expect("inc");
        increment_counter_sync(&conn, "layer1_full_analysis", 1).expect("inc");

        let totals = get_counter_totals_sync(&conn, 1).expect("totals");
        assert_eq!(totals.get("layer1_discard"), Some(&2));
        assert_eq!(totals.get("layer1_full_analysis"), Some(&1));
        // Missing counters read as zero via the map default
        assert_eq!(totals.get("layer1_lightweight").copied().unwrap_or(0), 0);
    }

    #[test]
    fn test_token_tracking_sums_and_counts_calls() {
        let conn = test_conn();
        track_tokens_sync(&conn, "layer1_macro", 1000, 200).expect("track");
        track_tokens_sync(&conn, "layer1_macro", 500, 100).expect("track");

        let totals = get_token_totals_sync(&conn, 1).expect("totals");
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].stage, "layer1_macro");
        assert_eq!(totals[0].input_tokens, 1500);
        assert_eq!(totals[0].output_tokens, 300);
        assert_eq!(totals[0].calls, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let conn = test_conn();
        increment_counter_sync(&conn, "fine_keep", 1).expect("inc");
        track_tokens_sync(&conn, "deep_multi_agent", 100, 10).expect("track");

        reset_counters_sync(&conn).expect("reset");
        assert!(get_counter_totals_sync(&conn, 7).expect("totals").is_empty());
        assert!(get_token_totals_sync(&conn, 7).expect("totals").is_empty());
    }
}
