// src/content/mod.rs
// Full-article content providers and the fallback chain

mod scraper;
mod vendor;

pub use scraper::ScraperProvider;
pub use vendor::VendorApiProvider;

use crate::error::{KingfisherError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-provider fetch timeout
const PROVIDER_TIMEOUT_SECS: u64 = 20;
/// Texts shorter than this are a total failure
const MIN_TEXT_CHARS: usize = 40;
/// Texts shorter than this are kept but marked partial (paywall fragments)
const PARTIAL_TEXT_CHARS: usize = 600;

/// Result of one successful provider fetch
#[derive(Debug, Clone, Default)]
pub struct FetchedContent {
    pub full_text: String,
    pub title: Option<String>,
    pub language: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub top_image: Option<String>,
    pub word_count: i64,
    /// Short / truncated text (paywall fragment), kept but flagged
    pub is_partial: bool,
    /// Provider that produced this content
    pub provider: &'static str,
}

/// One way of retrieving full article text
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch and clean the article at `url`. `language` is a hint ("en"/"zh").
    async fn fetch(&self, url: &str, language: &str) -> Result<FetchedContent>;
}

/// Ordered provider chain with sequential fallback.
///
/// Providers are tried in order with a bounded per-call timeout; the first
/// success wins. Partial results count as success.
pub struct ProviderChain {
    providers: Vec<Arc<dyn ContentProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ContentProvider>>) -> Self {
        Self { providers }
    }

    /// Default chain: scraper first, vendor API as fallback when configured
    pub fn scraper_first(vendor: Option<VendorApiProvider>) -> Self {
        let mut providers: Vec<Arc<dyn ContentProvider>> = vec![Arc::new(ScraperProvider::new())];
        if let Some(vendor) = vendor {
            providers.push(Arc::new(vendor));
        }
        Self { providers }
    }

    pub async fn fetch_with_fallback(&self, url: &str, language: &str) -> Result<FetchedContent> {
        let mut last_error =
            KingfisherError::Fetch("no content providers configured".into());

        for provider in &self.providers {
            let attempt = tokio::time::timeout(
                Duration::from_secs(PROVIDER_TIMEOUT_SECS),
                provider.fetch(url, language),
            )
            .await;

            match attempt {
                Ok(Ok(mut content)) => {
                    let chars = content.full_text.chars().count();
                    if chars < MIN_TEXT_CHARS {
                        last_error = KingfisherError::Fetch(format!(
                            "{}: extracted text too short ({chars} chars)",
                            provider.name()
                        ));
                        continue;
                    }
                    content.is_partial = chars < PARTIAL_TEXT_CHARS;
                    content.provider = provider.name();
                    if content.word_count == 0 {
                        content.word_count = estimate_word_count(&content.full_text);
                    }
                    debug!(
                        provider = provider.name(),
                        url = %url.chars().take(80).collect::<String>(),
                        words = content.word_count,
                        partial = content.is_partial,
                        "content fetched"
                    );
                    return Ok(content);
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), "fetch failed: {e}");
                    last_error = e;
                }
                Err(_) => {
                    warn!(provider = provider.name(), "fetch timed out");
                    last_error = KingfisherError::Fetch(format!(
                        "{}: timeout after {PROVIDER_TIMEOUT_SECS}s",
                        provider.name()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

/// Word count that works for both space-delimited and CJK text
pub(crate) fn estimate_word_count(text: &str) -> i64 {
    let words = text.split_whitespace().count();
    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    (words.max(cjk / 2)) as i64
}
