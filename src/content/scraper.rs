// src/content/scraper.rs
// Direct-scrape provider: fetch HTML and strip it down to article text

use crate::content::{estimate_word_count, ContentProvider, FetchedContent};
use crate::error::{KingfisherError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

pub struct ScraperProvider {
    client: reqwest::Client,
}

impl ScraperProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for ScraperProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentProvider for ScraperProvider {
    fn name(&self) -> &'static str {
        "scraper"
    }

    async fn fetch(&self, url: &str, language: &str) -> Result<FetchedContent> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("transport: {e}")))?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 402 || status.as_u16() == 451 {
            return Err(KingfisherError::Fetch(format!("blocked: status {status}")));
        }
        if !status.is_success() {
            return Err(KingfisherError::Fetch(format!("status {status}")));
        }

        let html = response
            .text()
            .await
            .map_err(|e| KingfisherError::Fetch(format!("body read: {e}")))?;

        let title = extract_title(&html);
        let text = extract_text(&html);
        if text.is_empty() {
            return Err(KingfisherError::Fetch("no extractable text".into()));
        }

        let word_count = estimate_word_count(&text);
        Ok(FetchedContent {
            full_text: text,
            title,
            language: Some(language.to_string()),
            word_count,
            ..Default::default()
        })
    }
}

fn tag_stripper() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap_or_else(|_| Regex::new("$^").expect("empty")))
}

fn block_stripper() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The regex crate has no backreferences, so each container tag gets its
    // own alternation arm
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b.*?</script>|<style\b.*?</style>|<nav\b.*?</nav>|<header\b.*?</header>|<footer\b.*?</footer>|<aside\b.*?</aside>|<noscript\b.*?</noscript>|<iframe\b.*?</iframe>|<form\b.*?</form>",
        )
        .unwrap_or_else(|_| Regex::new("$^").expect("empty"))
    })
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
            .unwrap_or_else(|_| Regex::new("$^").expect("empty"))
    })
}

fn extract_title(html: &str) -> Option<String> {
    title_regex()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str()).trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Strip scripts, styles, chrome, and tags; collapse whitespace.
///
/// Deliberately crude next to a real extraction library; the vendor API
/// provider covers sites where this falls apart.
fn extract_text(html: &str) -> String {
    let without_blocks = block_stripper().replace_all(html, " ");
    // Paragraph-ish tags become newlines so chunking sees structure
    let with_breaks = without_blocks
        .replace("</p>", "\n")
        .replace("</P>", "\n")
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    let without_tags = tag_stripper().replace_all(&with_breaks, " ");
    let decoded = decode_entities(&without_tags);

    decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
