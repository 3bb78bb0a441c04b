// src/feeds.rs
// Feed provider: headline sets served by an RSS hub as JSON

use crate::error::{KingfisherError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// One headline entry from a feed poll
#[derive(Debug, Clone, Default)]
pub struct FeedArticle {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub symbol: Option<String>,
    pub market: String,
    pub published_at: Option<String>,
    /// Present for fulltext-mode feeds: the article body ships in the payload
    pub content: Option<String>,
}

/// Source of feed headline sets
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, route: &str) -> Result<Vec<FeedArticle>>;
}

// RSS hub JSON payload
#[derive(Debug, Deserialize)]
struct HubFeed {
    #[serde(default)]
    items: Vec<HubItem>,
}

#[derive(Debug, Deserialize)]
struct HubItem {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "link")]
    url: String,
    #[serde(default, alias = "summary")]
    description: Option<String>,
    #[serde(default, alias = "pubDate")]
    date_published: Option<String>,
    #[serde(default, alias = "content_html")]
    content: Option<String>,
}

/// Client for an RSS hub that renders any feed route as JSON
pub struct RssHubClient {
    client: reqwest::Client,
    base_url: String,
}

impl RssHubClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn feed_url(&self, route: &str) -> String {
        if route.starts_with("http://") || route.starts_with("https://") {
            format!("{route}?format=json")
        } else {
            format!(
                "{}/{}?format=json",
                self.base_url.trim_end_matches('/'),
                route.trim_start_matches('/')
            )
        }
    }
}

#[async_trait]
impl FeedSource for RssHubClient {
    async fn fetch_feed(&self, route: &str) -> Result<Vec<FeedArticle>> {
        let url = self.feed_url(route);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("feed transport: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KingfisherError::Fetch(format!(
                "feed {route}: status {status}"
            )));
        }

        let feed: HubFeed = response
            .json()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("feed {route}: parse: {e}")))?;

        let articles: Vec<FeedArticle> = feed
            .items
            .into_iter()
            .filter(|item| !item.url.is_empty())
            .map(|item| FeedArticle {
                url: item.url,
                title: item.title.chars().take(500).collect(),
                summary: item.description,
                symbol: None,
                market: "US".into(),
                published_at: item.date_published,
                content: item.content.filter(|c| !c.trim().is_empty()),
            })
            .collect();

        debug!(route, count = articles.len(), "feed fetched");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_route_vs_absolute() {
        let client = RssHubClient::new("http://localhost:1200/");
        assert_eq!(
            client.feed_url("/wsj/markets"),
            "http://localhost:1200/wsj/markets?format=json"
        );
        assert_eq!(
            client.feed_url("https://feeds.example.com/tech"),
            "https://feeds.example.com/tech?format=json"
        );
    }

    #[test]
    fn test_hub_payload_parses_aliases() {
        let json = r#"{"items": [
            {"title": "T1", "link": "https://x/1", "summary": "s", "pubDate": "2026-07-30T10:00:00Z"},
            {"title": "T2", "url": "https://x/2", "content_html": "<p>full body</p>"},
            {"title": "no url"}
        ]}"#;
        let feed: HubFeed = serde_json::from_str(json).expect("parse");
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.items[0].url, "https://x/1");
        assert!(feed.items[1].content.is_some());
    }
}
