// src/db/settings.rs
// LLM assignment and system settings rows (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Stored model assignment for one purpose
#[derive(Debug, Clone)]
pub struct LlmAssignmentRow {
    pub purpose: String,
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

/// Load the assignment for a purpose, if configured
pub fn get_assignment_sync(conn: &Connection, purpose: &str) -> Result<Option<LlmAssignmentRow>> {
    conn.query_row(
        "SELECT purpose, provider, model, api_key, base_url
         FROM llm_assignments WHERE purpose = ?",
        [purpose],
        |row| {
            Ok(LlmAssignmentRow {
                purpose: row.get(0)?,
                provider: row.get(1)?,
                model: row.get(2)?,
                api_key: row.get(3)?,
                base_url: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Upsert an assignment (admin settings write path)
pub fn set_assignment_sync(conn: &Connection, row: &LlmAssignmentRow) -> Result<()> {
    conn.execute(
        "INSERT INTO llm_assignments (purpose, provider, model, api_key, base_url, updated_at)
         VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(purpose) DO UPDATE SET
            provider = excluded.provider,
            model = excluded.model,
            api_key = excluded.api_key,
            base_url = excluded.base_url,
            updated_at = CURRENT_TIMESTAMP",
        params![row.purpose, row.provider, row.model, row.api_key, row.base_url],
    )?;
    Ok(())
}

/// Read one system_settings value
pub fn get_setting_sync(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM system_settings WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(Into::into)
}

/// Upsert one system_settings value
pub fn set_setting_sync(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO system_settings (key, value, updated_at)
         VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        params![key, value],
    )?;
    Ok(())
}

/// Read an integer setting with a fallback default
pub fn get_int_setting_sync(conn: &Connection, key: &str, default: i64) -> Result<i64> {
    Ok(get_setting_sync(conn, key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Read a boolean setting ("true"/"1" are truthy) with a fallback default
pub fn get_bool_setting_sync(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_setting_sync(conn, key)?
        .map(|v| matches!(v.as_str(), "true" | "1"))
        .unwrap_or(default))
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
    fn test_assignment_upsert_and_read() {
        let conn = test_conn();
        let row = LlmAssignmentRow {
            purpose: "layer1_scoring".into(),
            provider: "deepseek".into(),
            model: "deepseek-chat".into(),
            api_key: "sk-test".into(),
            base_url: "https://api.deepseek.com".into(),
        };
        set_assignment_sync(&conn, &row).expect("set");

        let loaded = get_assignment_sync(&conn, "layer1_scoring")
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.model, "deepseek-chat");

        // Upsert replaces
        let row2 = LlmAssignmentRow {
            model: "deepseek-reasoner".into(),
            ..row
        };
        set_assignment_sync(&conn, &row2).expect("set again");
        let loaded = get_assignment_sync(&conn, "layer1_scoring")
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.model, "deepseek-reasoner");
    }

    #[test]
    fn test_missing_assignment_is_none() {
        let conn = test_conn();
        assert!(get_assignment_sync(&conn, "news_filter").expect("get").is_none());
    }

    #[test]
    fn test_int_setting_defaults() {
        let conn = test_conn();
        assert_eq!(
            get_int_setting_sync(&conn, "layer1_discard_threshold", 105).expect("get"),
            105
        );
        set_setting_sync(&conn, "layer1_discard_threshold", "120").expect("set");
        assert_eq!(
            get_int_setting_sync(&conn, "layer1_discard_threshold", 105).expect("get"),
            120
        );
    }

    #[test]
    fn test_bool_setting() {
        let conn = test_conn();
        assert!(!get_bool_setting_sync(&conn, "use_two_phase_filter", false).expect("get"));
        set_setting_sync(&conn, "use_two_phase_filter", "true").expect("set");
        assert!(get_bool_setting_sync(&conn, "use_two_phase_filter", false).expect("get"));
    }
}
