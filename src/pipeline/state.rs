// src/pipeline/state.rs
// Mutable state bag threaded through the Layer 2 workflow graph

use crate::db::trace::TraceEvent;
use crate::db::types::RelatedEntity;
use serde_json::Value;

/// Filter decision produced by deep_filter / single_filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterDecision {
    #[default]
    Keep,
    Delete,
}

/// Terminal outcome of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalStatus {
    #[default]
    Pending,
    Embedded,
    Deleted,
    Failed,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

/// Inputs handed to the workflow by the Layer 1.5 dispatcher
#[derive(Debug, Clone, Default)]
pub struct ArticleJob {
    pub article_id: String,
    pub url: String,
    pub market: String,
    pub symbol: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub published_at: Option<String>,
    /// Two-phase (deep filter) vs legacy (single filter)
    pub use_two_phase: bool,
    /// Content-file path written by Layer 1.5
    pub file_path: Option<String>,
}

/// Per-article workflow state.
///
/// Exactly one node mutates the bag at a time; trace events accumulate here
/// and are persisted only by the terminal update_db node, so a crashed run
/// leaves no partial trace.
#[derive(Debug, Default)]
pub struct WorkflowState {
    pub job: ArticleJob,

    // Populated by read_file
    pub full_text: Option<String>,
    pub word_count: i64,
    pub language: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,

    // Populated by the filter nodes
    pub filter_decision: FilterDecision,
    pub entities: Option<Vec<RelatedEntity>>,
    pub industry_tags: Option<Vec<String>>,
    pub event_tags: Option<Vec<String>>,
    pub sentiment_tag: Option<String>,
    pub investment_summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub analysis_report: Option<String>,
    pub market_context: Option<Value>,

    // Populated by embed
    pub chunks_total: usize,
    pub chunks_stored: usize,

    // Terminal bookkeeping
    pub final_status: FinalStatus,
    pub error: Option<String>,
    pub trace_events: Vec<TraceEvent>,
}

impl WorkflowState {
    pub fn new(job: ArticleJob) -> Self {
        Self {
            job,
            ..Default::default()
        }
    }

    /// Record a node failure without raising
    pub fn fail(&mut self, error: impl Into<String>) {
        self.final_status = FinalStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn push_event(&mut self, event: TraceEvent) {
        self.trace_events.push(event);
    }
}
