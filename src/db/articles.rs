// src/db/articles.rs
// Article row operations (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use super::types::{Article, ContentStatus, FilterStatus, RelatedEntity};

/// Fields needed to create a new article from a feed payload
#[derive(Debug, Clone)]
pub struct ArticleInsert<'a> {
    pub id: &'a str,
    pub source: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    pub summary: Option<&'a str>,
    pub symbol: Option<&'a str>,
    pub market: &'a str,
    pub published_at: Option<&'a str>,
}

/// Insert a new article with pending statuses.
///
/// Returns false if an article with the same (source, url) already exists.
pub fn insert_article_sync(conn: &Connection, insert: &ArticleInsert) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO articles
            (id, source, url, title, summary, symbol, market, published_at,
             content_status, filter_status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'pending')",
        params![
            insert.id,
            insert.source,
            insert.url,
            insert.title,
            insert.summary,
            insert.symbol,
            insert.market,
            insert.published_at,
        ],
    )?;
    Ok(changed > 0)
}

fn parse_json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

/// Load one article by id
pub fn get_article_sync(conn: &Connection, id: &str) -> Result<Option<Article>> {
    let row = conn
        .query_row(
            "SELECT id, source, url, title, summary, symbol, market, published_at,
                    created_at, content_status, filter_status, content_file_path,
                    content_error, language, word_count, related_entities,
                    industry_tags, event_tags, sentiment_tag, investment_summary,
                    detailed_summary, analysis_report, market_context,
                    primary_entity, primary_entity_type, has_stock_entities,
                    has_macro_entities, max_entity_score
             FROM articles WHERE id = ?",
            [id],
            |row| {
                Ok((
                    Article {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        url: row.get(2)?,
                        title: row.get(3)?,
                        summary: row.get(4)?,
                        symbol: row.get(5)?,
                        market: row.get(6)?,
                        published_at: row.get(7)?,
                        created_at: row.get(8)?,
                        content_status: ContentStatus::Pending, // patched below
                        filter_status: FilterStatus::Pending,
                        content_file_path: row.get(11)?,
                        content_error: row.get(12)?,
                        language: row.get(13)?,
                        word_count: row.get(14)?,
                        related_entities: None,
                        industry_tags: None,
                        event_tags: None,
                        sentiment_tag: row.get(18)?,
                        investment_summary: row.get(19)?,
                        detailed_summary: row.get(20)?,
                        analysis_report: row.get(21)?,
                        market_context: None,
                        primary_entity: row.get(23)?,
                        primary_entity_type: row.get(24)?,
                        has_stock_entities: row.get(25)?,
                        has_macro_entities: row.get(26)?,
                        max_entity_score: row.get(27)?,
                    },
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, Option<String>>(15)?,
                    row.get::<_, Option<String>>(16)?,
                    row.get::<_, Option<String>>(17)?,
                    row.get::<_, Option<String>>(22)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(
        |(mut article, content_status, filter_status, entities, industry, events, context)| {
            article.content_status =
                ContentStatus::parse(&content_status).unwrap_or(ContentStatus::Pending);
            article.filter_status =
                FilterStatus::parse(&filter_status).unwrap_or(FilterStatus::Pending);
            article.related_entities = parse_json_column::<Vec<RelatedEntity>>(entities);
            article.industry_tags = parse_json_column::<Vec<String>>(industry);
            article.event_tags = parse_json_column::<Vec<String>>(events);
            article.market_context = parse_json_column::<serde_json::Value>(context);
            article
        },
    ))
}

/// Current content status of an article (None if the row is missing)
pub fn get_content_status_sync(conn: &Connection, id: &str) -> Result<Option<ContentStatus>> {
    let status: Option<String> = conn
        .query_row("SELECT content_status FROM articles WHERE id = ?", [id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(status.and_then(|s| ContentStatus::parse(&s)))
}

/// Record a successful Layer 1.5 fetch
pub struct FetchedUpdate<'a> {
    pub article_id: &'a str,
    pub file_path: &'a str,
    pub status: ContentStatus, // Fetched or Partial
    pub language: Option<&'a str>,
    pub authors: Option<&'a [String]>,
    pub keywords: Option<&'a [String]>,
    pub top_image: Option<&'a str>,
    pub word_count: i64,
}

pub fn mark_content_fetched_sync(conn: &Connection, update: &FetchedUpdate) -> Result<()> {
    let authors = update.authors.map(serde_json::to_string).transpose()?;
    let keywords = update.keywords.map(serde_json::to_string).transpose()?;
    conn.execute(
        "UPDATE articles SET
            content_file_path = ?, content_status = ?, content_error = NULL,
            content_fetched_at = CURRENT_TIMESTAMP, language = ?, authors = ?,
            keywords = ?, top_image = ?, word_count = ?
         WHERE id = ?",
        params![
            update.file_path,
            update.status.as_str(),
            update.language,
            authors,
            keywords,
            update.top_image,
            update.word_count,
            update.article_id,
        ],
    )?;
    Ok(())
}

/// Record a failed Layer 1.5 fetch (status must be Failed or Blocked)
pub fn mark_content_failed_sync(
    conn: &Connection,
    article_id: &str,
    status: ContentStatus,
    error: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE articles SET
            content_status = ?, content_error = ?, content_fetched_at = CURRENT_TIMESTAMP
         WHERE id = ?",
        params![status.as_str(), truncate(error, 200), article_id],
    )?;
    Ok(())
}

/// Set the filter status written by the initial single-stage filter
pub fn set_filter_status_sync(
    conn: &Connection,
    article_id: &str,
    status: FilterStatus,
) -> Result<()> {
    conn.execute(
        "UPDATE articles SET filter_status = ? WHERE id = ?",
        params![status.as_str(), article_id],
    )?;
    Ok(())
}

/// Analysis fields written by the workflow's terminal update_db node.
///
/// All fields are written in one UPDATE so entities, sentiment, and report
/// are never partially visible.
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpdate {
    pub article_id: String,
    pub content_status: ContentStatus,
    pub filter_status: Option<FilterStatus>,
    pub clear_file_path: bool,
    pub entities: Option<Vec<RelatedEntity>>,
    pub industry_tags: Option<Vec<String>>,
    pub event_tags: Option<Vec<String>>,
    pub sentiment_tag: Option<String>,
    pub investment_summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub analysis_report: Option<String>,
    pub market_context: Option<serde_json::Value>,
}

/// Apply the terminal workflow update.
///
/// Entity-derived columns (primary_entity, has_stock_entities, ...) are
/// computed here from the entity list. Idempotent: re-running with the same
/// update yields the same row.
pub fn apply_analysis_update_sync(conn: &Connection, update: &AnalysisUpdate) -> Result<()> {
    let entities_json = update.entities.as_ref().map(serde_json::to_string).transpose()?;
    let industry_json = update
        .industry_tags
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let events_json = update.event_tags.as_ref().map(serde_json::to_string).transpose()?;
    let context_json = update
        .market_context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    // Derived entity columns
    let mut primary_entity: Option<String> = None;
    let mut primary_entity_type: Option<String> = None;
    let mut has_stock: Option<bool> = None;
    let mut has_macro: Option<bool> = None;
    let mut max_score: Option<f64> = None;

    if let Some(entities) = update.entities.as_ref().filter(|e| !e.is_empty()) {
        has_stock = Some(entities.iter().any(|e| e.entity_type == "stock"));
        has_macro = Some(entities.iter().any(|e| e.entity_type == "macro"));
        max_score = entities.iter().map(|e| e.score).fold(None, |acc, s| {
            Some(acc.map_or(s, |m: f64| m.max(s)))
        });
        if let Some(stock) = entities.iter().find(|e| e.entity_type == "stock") {
            primary_entity = Some(stock.entity.clone());
            primary_entity_type = Some("stock".into());
        } else if let Some(first) = entities.first() {
            primary_entity = Some(first.entity.clone());
            primary_entity_type = Some(first.entity_type.clone());
        }
    }

    conn.execute(
        "UPDATE articles SET
            content_status = ?,
            filter_status = COALESCE(?, filter_status),
            content_file_path = CASE WHEN ? THEN NULL ELSE content_file_path END,
            related_entities = COALESCE(?, related_entities),
            industry_tags = COALESCE(?, industry_tags),
            event_tags = COALESCE(?, event_tags),
            sentiment_tag = COALESCE(?, sentiment_tag),
            investment_summary = COALESCE(?, investment_summary),
            detailed_summary = COALESCE(?, detailed_summary),
            analysis_report = COALESCE(?, analysis_report),
            market_context = COALESCE(?, market_context),
            primary_entity = COALESCE(?, primary_entity),
            primary_entity_type = COALESCE(?, primary_entity_type),
            has_stock_entities = COALESCE(?, has_stock_entities),
            has_macro_entities = COALESCE(?, has_macro_entities),
            max_entity_score = COALESCE(?, max_entity_score)
         WHERE id = ?",
        params![
            update.content_status.as_str(),
            update.filter_status.map(|s| s.as_str()),
            update.clear_file_path,
            entities_json,
            industry_json,
            events_json,
            update.sentiment_tag,
            update.investment_summary,
            update.detailed_summary,
            update.analysis_report,
            context_json,
            primary_entity,
            primary_entity_type,
            has_stock,
            has_macro,
            max_score,
            update.article_id,
        ],
    )?;
    Ok(())
}

/// Articles eligible for the content-file sweep: file present, old enough,
/// and in a non-live status.
pub fn list_sweepable_articles_sync(
    conn: &Connection,
    retention_days: u32,
    limit: usize,
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, content_file_path FROM articles
         WHERE content_file_path IS NOT NULL
           AND created_at < datetime('now', ?)
           AND content_status IN ('deleted', 'failed', 'blocked')
         LIMIT ?",
    )?;
    let rows = stmt.query_map(
        params![format!("-{} days", retention_days), limit as i64],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Clear the content-file reference after a sweep deleted the file
pub fn clear_content_file_sync(conn: &Connection, article_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE articles SET content_file_path = NULL WHERE id = ?",
        [article_id],
    )?;
    Ok(())
}

/// Look up an article id by (source, url) — the dedup key
pub fn find_by_source_url_sync(
    conn: &Connection,
    source: &str,
    url: &str,
) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM articles WHERE source = ? AND url = ?",
        params![source, url],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
