// src/settings.rs
// Purpose-based model resolution over the llm_assignments table

use crate::db::pool::DatabasePool;
use crate::db::settings::{
    get_assignment_sync, get_bool_setting_sync, get_int_setting_sync, LlmAssignmentRow,
};
use crate::error::{KingfisherError, Result};
use crate::llm::ProviderKind;
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default routing thresholds, used when the settings rows are absent.
/// These are the only defaults the resolver guesses.
pub const DEFAULT_DISCARD_THRESHOLD: i64 = 105;
pub const DEFAULT_FULL_ANALYSIS_THRESHOLD: i64 = 195;

/// Named LLM roles the pipeline resolves to concrete models.
///
/// Purposes are stable identifiers; an unknown purpose string is a hard
/// error at boot, not per-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Layer1Scoring,
    Layer2Analysis,
    Layer2Lightweight,
    Layer15Cleaning,
    /// Legacy single-stage filter; also the fallback for Layer1Scoring
    NewsFilter,
    ContentExtraction,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Layer1Scoring => "layer1_scoring",
            Self::Layer2Analysis => "phase2_layer2_analysis",
            Self::Layer2Lightweight => "phase2_layer2_lightweight",
            Self::Layer15Cleaning => "phase2_layer15_cleaning",
            Self::NewsFilter => "news_filter",
            Self::ContentExtraction => "content_extraction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "layer1_scoring" => Some(Self::Layer1Scoring),
            "phase2_layer2_analysis" => Some(Self::Layer2Analysis),
            "phase2_layer2_lightweight" => Some(Self::Layer2Lightweight),
            "phase2_layer15_cleaning" => Some(Self::Layer15Cleaning),
            "news_filter" => Some(Self::NewsFilter),
            "content_extraction" => Some(Self::ContentExtraction),
            _ => None,
        }
    }

    /// Fallback purpose tried when this one has no explicit assignment
    fn fallback(&self) -> Option<Purpose> {
        match self {
            Self::Layer1Scoring => Some(Self::NewsFilter),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete model configuration resolved for a purpose
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub purpose: Purpose,
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

/// Routing thresholds read once per scoring run
#[derive(Debug, Clone, Copy)]
pub struct ScoringThresholds {
    pub discard: i64,
    pub full_analysis: i64,
}

/// Resolves purposes to model configurations, with a read-through cache.
///
/// The resolver is read-heavy; resolved entries stay cached until a settings
/// change invalidates them (`invalidate`), with a TTL safety net.
pub struct ProviderResolver {
    pool: Arc<DatabasePool>,
    cache: Cache<Purpose, ResolvedModel>,
}

impl ProviderResolver {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self {
            pool,
            cache: Cache::builder()
                .max_capacity(32)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    /// Resolve a purpose to a model configuration.
    ///
    /// Resolution order: explicit assignment, then the purpose's fallback,
    /// then a hard configuration error. No silent defaults.
    pub async fn resolve(&self, purpose: Purpose) -> Result<ResolvedModel> {
        if let Some(cached) = self.cache.get(&purpose).await {
            return Ok(cached);
        }

        let resolved = self.resolve_uncached(purpose).await?;
        self.cache.insert(purpose, resolved.clone()).await;
        Ok(resolved)
    }

    async fn resolve_uncached(&self, purpose: Purpose) -> Result<ResolvedModel> {
        if let Some(row) = self.load_assignment(purpose).await? {
            return row_to_resolved(purpose, row);
        }

        if let Some(fallback) = purpose.fallback() {
            info!(purpose = %purpose, fallback = %fallback, "Purpose not configured, using fallback");
            if let Some(row) = self.load_assignment(fallback).await? {
                return row_to_resolved(purpose, row);
            }
        }

        Err(KingfisherError::Config(format!(
            "no LLM assignment configured for purpose '{purpose}'"
        )))
    }

    async fn load_assignment(&self, purpose: Purpose) -> Result<Option<LlmAssignmentRow>> {
        let name = purpose.as_str();
        self.pool
            .interact(move |conn| get_assignment_sync(conn, name))
            .await
            .map_err(KingfisherError::Anyhow)
    }

    /// Drop all cached resolutions (settings-change signal)
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// Read the Layer 1 routing thresholds, falling back to (105, 195)
    pub async fn scoring_thresholds(&self) -> ScoringThresholds {
        let result = self
            .pool
            .interact(|conn| {
                let discard = get_int_setting_sync(
                    conn,
                    "layer1_discard_threshold",
                    DEFAULT_DISCARD_THRESHOLD,
                )?;
                let full = get_int_setting_sync(
                    conn,
                    "layer1_full_analysis_threshold",
                    DEFAULT_FULL_ANALYSIS_THRESHOLD,
                )?;
                Ok((discard, full))
            })
            .await;

        match result {
            Ok((discard, full_analysis)) => ScoringThresholds {
                discard,
                full_analysis,
            },
            Err(e) => {
                warn!("Failed to read Layer 1 thresholds, using defaults: {e}");
                ScoringThresholds {
                    discard: DEFAULT_DISCARD_THRESHOLD,
                    full_analysis: DEFAULT_FULL_ANALYSIS_THRESHOLD,
                }
            }
        }
    }

    /// Whether the two-phase filter path is enabled system-wide
    pub async fn use_two_phase_filter(&self) -> bool {
        self.pool
            .try_interact("read use_two_phase_filter", |conn| {
                get_bool_setting_sync(conn, "use_two_phase_filter", false)
            })
            .await
            .unwrap_or(false)
    }
}

fn row_to_resolved(purpose: Purpose, row: LlmAssignmentRow) -> Result<ResolvedModel> {
    let provider = ProviderKind::from_str(&row.provider).ok_or_else(|| {
        KingfisherError::Config(format!(
            "unknown provider '{}' for purpose '{}'",
            row.provider, purpose
        ))
    })?;

    if row.api_key.trim().is_empty() {
        return Err(KingfisherError::Config(format!(
            "empty API key for purpose '{purpose}'"
        )));
    }

    let base_url = if row.base_url.trim().is_empty() {
        provider.default_base_url().to_string()
    } else {
        row.base_url
    };

    Ok(ResolvedModel {
        purpose,
        provider,
        model: row.model,
        api_key: row.api_key,
        base_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::settings::set_assignment_sync;

    async fn pool_with_assignment(purpose: &str, model: &str) -> Arc<DatabasePool> {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        let purpose = purpose.to_string();
        let model = model.to_string();
        pool.interact(move |conn| {
            set_assignment_sync(
                conn,
                &LlmAssignmentRow {
                    purpose,
                    provider: "deepseek".into(),
                    model,
                    api_key: "sk-test".into(),
                    base_url: String::new(),
                },
            )
        })
        .await
        .expect("seed");
        pool
    }

    #[tokio::test]
    async fn test_resolve_explicit_assignment() {
        let pool = pool_with_assignment("layer1_scoring", "deepseek-chat").await;
        let resolver = ProviderResolver::new(pool);

        let resolved = resolver.resolve(Purpose::Layer1Scoring).await.expect("resolve");
        assert_eq!(resolved.model, "deepseek-chat");
        assert_eq!(resolved.provider, ProviderKind::DeepSeek);
        // Empty base_url falls back to the provider default
        assert_eq!(resolved.base_url, "https://api.deepseek.com");
    }

    #[tokio::test]
    async fn test_layer1_falls_back_to_news_filter() {
        let pool = pool_with_assignment("news_filter", "deepseek-reasoner").await;
        let resolver = ProviderResolver::new(pool);

        let resolved = resolver.resolve(Purpose::Layer1Scoring).await.expect("resolve");
        assert_eq!(resolved.model, "deepseek-reasoner");
        assert_eq!(resolved.purpose, Purpose::Layer1Scoring);
    }

    #[tokio::test]
    async fn test_unconfigured_purpose_is_hard_error() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        let resolver = ProviderResolver::new(pool);

        let result = resolver.resolve(Purpose::Layer2Analysis).await;
        assert!(matches!(result, Err(KingfisherError::Config(_))));
    }

    #[tokio::test]
    async fn test_thresholds_default_and_override() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        let resolver = ProviderResolver::new(pool.clone());

        let thresholds = resolver.scoring_thresholds().await;
        assert_eq!(thresholds.discard, 105);
        assert_eq!(thresholds.full_analysis, 195);

        pool.interact(|conn| {
            crate::db::settings::set_setting_sync(conn, "layer1_discard_threshold", "90")?;
            crate::db::settings::set_setting_sync(conn, "layer1_full_analysis_threshold", "210")
        })
        .await
        .expect("set");

        let thresholds = resolver.scoring_thresholds().await;
        assert_eq!(thresholds.discard, 90);
        assert_eq!(thresholds.full_analysis, 210);
    }

    #[test]
    fn test_purpose_roundtrip() {
        for purpose in [
            Purpose::Layer1Scoring,
            Purpose::Layer2Analysis,
            Purpose::Layer2Lightweight,
            Purpose::Layer15Cleaning,
            Purpose::NewsFilter,
            Purpose::ContentExtraction,
        ] {
            assert_eq!(Purpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(Purpose::parse("bogus"), None);
    }
}
