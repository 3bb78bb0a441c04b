// src/db/feeds.rs
// Feed subscription operations (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, params};

use super::types::Feed;

fn feed_from_row(row: &rusqlite::Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        route: row.get(1)?,
        category: row.get(2)?,
        interval_minutes: row.get(3)?,
        fulltext_mode: row.get::<_, i64>(4)? != 0,
        enabled: row.get::<_, i64>(5)? != 0,
        last_polled_at: row.get(6)?,
        consecutive_errors: row.get(7)?,
        article_count: row.get(8)?,
    })
}

const FEED_COLUMNS: &str = "id, route, category, interval_minutes, fulltext_mode, enabled, \
                            last_polled_at, consecutive_errors, article_count";

/// Insert a feed subscription (admin-created)
pub fn insert_feed_sync(
    conn: &Connection,
    route: &str,
    category: &str,
    interval_minutes: i64,
    fulltext_mode: bool,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO feeds (route, category, interval_minutes, fulltext_mode)
         VALUES (?, ?, ?, ?)",
        params![route, category, interval_minutes, fulltext_mode],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Enabled feeds whose poll interval has elapsed (or that were never polled)
pub fn list_due_feeds_sync(conn: &Connection) -> Result<Vec<Feed>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEED_COLUMNS} FROM feeds
         WHERE enabled = 1
           AND (last_polled_at IS NULL
                OR datetime(last_polled_at, '+' || interval_minutes || ' minutes')
                   <= datetime('now'))
         ORDER BY last_polled_at ASC NULLS FIRST"
    ))?;
    let rows = stmt.query_map([], feed_from_row)?;
    let mut feeds = Vec::new();
    for row in rows {
        feeds.push(row?);
    }
    Ok(feeds)
}

/// Record the outcome of one poll: stamp last_polled_at, add new articles to
/// the cumulative count, and reset or bump consecutive_errors.
pub fn record_poll_result_sync(
    conn: &Connection,
    feed_id: i64,
    new_articles: i64,
    errored: bool,
) -> Result<()> {
    if errored {
        conn.execute(
            "UPDATE feeds SET
                last_polled_at = CURRENT_TIMESTAMP,
                consecutive_errors = consecutive_errors + 1
             WHERE id = ?",
            [feed_id],
        )?;
    } else {
        conn.execute(
            "UPDATE feeds SET
                last_polled_at = CURRENT_TIMESTAMP,
                article_count = article_count + ?,
                consecutive_errors = 0
             WHERE id = ?",
            params![new_articles, feed_id],
        )?;
    }
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
    fn test_never_polled_feed_is_due() {
        let conn = test_conn();
        insert_feed_sync(&conn, "/wsj/markets", "market", 30, false).expect("insert");

        let due = list_due_feeds_sync(&conn).expect("list");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].route, "/wsj/markets");
    }

    #[test]
    fn test_recently_polled_feed_is_not_due() {
        let conn = test_conn();
        let id = insert_feed_sync(&conn, "/wsj/markets", "market", 30, false).expect("insert");
        record_poll_result_sync(&conn, id, 5, false).expect("record");

        let due = list_due_feeds_sync(&conn).expect("list");
        assert!(due.is_empty());
    }

    #[test]
    fn test_disabled_feed_is_never_due() {
        let conn = test_conn();
        let id = insert_feed_sync(&conn, "/wsj/markets", "market", 30, false).expect("insert");
        conn.execute("UPDATE feeds SET enabled = 0 WHERE id = ?", [id])
            .expect("disable");

        assert!(list_due_feeds_sync(&conn).expect("list").is_empty());
    }

    #[test]
    fn test_poll_result_error_bumps_counter() {
        let conn = test_conn();
        let id = insert_feed_sync(&conn, "/r", "macro", 15, true).expect("insert");

        record_poll_result_sync(&conn, id, 0, true).expect("err 1");
        record_poll_result_sync(&conn, id, 0, true).expect("err 2");
        record_poll_result_sync(&conn, id, 3, false).expect("success");

        let feed: Feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"),
                [id],
                feed_from_row,
            )
            .expect("row");
        assert_eq!(feed.consecutive_errors, 0, "success resets the error streak");
        assert_eq!(feed.article_count, 3);
        assert!(feed.fulltext_mode);
    }
}
