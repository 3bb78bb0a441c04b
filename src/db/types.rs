// src/db/types.rs
// Shared row types for articles and feeds

use serde::{Deserialize, Serialize};

/// Content lifecycle of an article.
///
/// Terminal states are `Embedded` and `Deleted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Pending,
    Fetched,
    Partial,
    Embedded,
    Failed,
    Blocked,
    Deleted,
    EmbeddingFailed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetched => "fetched",
            Self::Partial => "partial",
            Self::Embedded => "embedded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
            Self::EmbeddingFailed => "embedding_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetched" => Some(Self::Fetched),
            "partial" => Some(Self::Partial),
            "embedded" => Some(Self::Embedded),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "deleted" => Some(Self::Deleted),
            "embedding_failed" => Some(Self::EmbeddingFailed),
            _ => None,
        }
    }

    /// Whether this status is terminal for Layer 1.5 (fetch must not retry)
    pub fn is_fetch_terminal(&self) -> bool {
        matches!(self, Self::Fetched | Self::Partial | Self::Embedded | Self::Deleted)
    }
}

/// Filter lifecycle of an article.
///
/// `Useful`/`Uncertain`/`Skipped` come from the initial single-stage filter;
/// `FineKeep`/`FineDelete` are written by the Layer 2 two-phase path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStatus {
    Pending,
    Useful,
    Uncertain,
    Skipped,
    FineKeep,
    FineDelete,
}

impl FilterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Useful => "useful",
            Self::Uncertain => "uncertain",
            Self::Skipped => "skipped",
            Self::FineKeep => "fine_keep",
            Self::FineDelete => "fine_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "useful" => Some(Self::Useful),
            "uncertain" => Some(Self::Uncertain),
            "skipped" => Some(Self::Skipped),
            "fine_keep" => Some(Self::FineKeep),
            "fine_delete" => Some(Self::FineDelete),
            _ => None,
        }
    }
}

/// An entity extracted from an article by the deep-analysis path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedEntity {
    pub entity: String,
    /// "stock" | "index" | "macro"
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Relevance score in [0, 1]
    pub score: f64,
}

/// One news article row
#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub source: String,
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub symbol: Option<String>,
    pub market: String,
    pub published_at: Option<String>,
    pub created_at: Option<String>,
    pub content_status: ContentStatus,
    pub filter_status: FilterStatus,
    pub content_file_path: Option<String>,
    pub content_error: Option<String>,
    pub language: Option<String>,
    pub word_count: Option<i64>,
    pub related_entities: Option<Vec<RelatedEntity>>,
    pub industry_tags: Option<Vec<String>>,
    pub event_tags: Option<Vec<String>>,
    pub sentiment_tag: Option<String>,
    pub investment_summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub analysis_report: Option<String>,
    pub market_context: Option<serde_json::Value>,
    pub primary_entity: Option<String>,
    pub primary_entity_type: Option<String>,
    pub has_stock_entities: Option<bool>,
    pub has_macro_entities: Option<bool>,
    pub max_entity_score: Option<f64>,
}

/// One feed subscription row
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub id: i64,
    pub route: String,
    pub category: String,
    pub interval_minutes: i64,
    pub fulltext_mode: bool,
    pub enabled: bool,
    pub last_polled_at: Option<String>,
    pub consecutive_errors: i64,
    pub article_count: i64,
}
