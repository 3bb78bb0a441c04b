// src/content/vendor.rs
// Vendor-API provider: article content from a licensed news API

use crate::content::{ContentProvider, FetchedContent};
use crate::error::{KingfisherError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Provider backed by a vendor news API that serves cleaned article bodies
/// as JSON, keyed by article URL.
pub struct VendorApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct VendorArticle {
    #[serde(default)]
    body: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VendorResponse {
    #[serde(default)]
    results: Vec<VendorArticle>,
}

impl VendorApiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ContentProvider for VendorApiProvider {
    fn name(&self) -> &'static str {
        "vendor"
    }

    async fn fetch(&self, url: &str, language: &str) -> Result<FetchedContent> {
        let endpoint = format!(
            "{}/v1/articles?url={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(url)
        );

        let response = self
            .client
            .get(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("transport: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(KingfisherError::Fetch(format!("blocked: vendor auth {status}")));
        }
        if !status.is_success() {
            return Err(KingfisherError::Fetch(format!("vendor status {status}")));
        }

        let parsed: VendorResponse = response
            .json()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("vendor parse: {e}")))?;

        let article = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| KingfisherError::Fetch("vendor: no article for url".into()))?;

        if article.body.trim().is_empty() {
            return Err(KingfisherError::Fetch("vendor: empty body".into()));
        }

        Ok(FetchedContent {
            full_text: article.body,
            title: article.title,
            language: Some(language.to_string()),
            authors: article.authors,
            keywords: article.keywords,
            top_image: article.image_url,
            ..Default::default()
        })
    }
}
