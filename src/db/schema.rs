// src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Run all schema setup and migrations.
///
/// Called during database initialization. This function is idempotent -
/// every statement uses IF NOT EXISTS.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- =======================================
-- ARTICLES
-- =======================================
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,                 -- uuid v4
    source TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    summary TEXT,
    symbol TEXT,
    market TEXT NOT NULL DEFAULT 'US',
    published_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,

    -- content lifecycle
    content_status TEXT NOT NULL DEFAULT 'pending',
    filter_status TEXT NOT NULL DEFAULT 'pending',
    content_file_path TEXT,
    content_error TEXT,
    content_fetched_at TEXT,
    language TEXT,
    authors TEXT,                        -- JSON array
    keywords TEXT,                       -- JSON array
    top_image TEXT,
    word_count INTEGER,

    -- analysis outputs (Layer 2)
    related_entities TEXT,               -- JSON array of {entity, type, score}
    industry_tags TEXT,                  -- JSON array
    event_tags TEXT,                     -- JSON array
    sentiment_tag TEXT,
    investment_summary TEXT,
    detailed_summary TEXT,
    analysis_report TEXT,                -- markdown
    market_context TEXT,                 -- JSON impact block
    primary_entity TEXT,
    primary_entity_type TEXT,
    has_stock_entities INTEGER,
    has_macro_entities INTEGER,
    max_entity_score REAL,

    UNIQUE(source, url)
);
CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(content_status);
CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_symbol ON articles(symbol);

-- =======================================
-- FEEDS
-- =======================================
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY,
    route TEXT NOT NULL UNIQUE,          -- RSS hub route or absolute URL
    category TEXT NOT NULL DEFAULT 'market',
    interval_minutes INTEGER NOT NULL DEFAULT 30,
    fulltext_mode INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_polled_at TEXT,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    article_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- PIPELINE TRACE (append-only)
-- =======================================
CREATE TABLE IF NOT EXISTS pipeline_events (
    id INTEGER PRIMARY KEY,
    article_id TEXT NOT NULL,
    layer TEXT NOT NULL,                 -- '1', '1.5', '2'
    node TEXT NOT NULL,                  -- 'score', 'fetch', 'read_file', ...
    status TEXT NOT NULL,                -- 'success' | 'error' | 'skip'
    duration_ms REAL NOT NULL DEFAULT 0,
    metadata TEXT,                       -- JSON
    error TEXT,                          -- truncated to 200 chars at write time
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_article ON pipeline_events(article_id, id);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_created ON pipeline_events(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_node ON pipeline_events(layer, node, status);

-- =======================================
-- FILTER STATS (day-bucketed counters)
-- =======================================
CREATE TABLE IF NOT EXISTS filter_counters (
    day TEXT NOT NULL,                   -- 'YYYY-MM-DD' (UTC)
    name TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (day, name)
);

CREATE TABLE IF NOT EXISTS token_usage (
    day TEXT NOT NULL,
    stage TEXT NOT NULL,                 -- 'layer1_macro', 'deep_multi_agent', ...
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    calls INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (day, stage)
);

-- =======================================
-- SETTINGS
-- =======================================
CREATE TABLE IF NOT EXISTS llm_assignments (
    purpose TEXT PRIMARY KEY,            -- 'layer1_scoring', 'news_filter', ...
    provider TEXT NOT NULL,              -- 'deepseek' | 'openai_compat' | ...
    model TEXT NOT NULL,
    api_key TEXT NOT NULL,
    base_url TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS system_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- VECTOR TABLE (sqlite-vec)
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS vec_news USING vec0(
    embedding float[1536],
    +source_type TEXT,
    +source_id TEXT,
    +chunk_index INTEGER,
    +chunk_text TEXT,
    +symbol TEXT
);
"#;
