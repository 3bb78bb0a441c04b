// src/storage/mod.rs
// Durable per-article content files (JSON, whole-file replace)

use crate::error::{KingfisherError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Payload persisted for one fetched article
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentFile {
    pub url: String,
    pub title: String,
    pub full_text: String,
    pub word_count: i64,
    pub language: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub top_image: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// File-backed content store rooted at a single directory.
///
/// Paths embed the article id so identical URLs ingested twice can never
/// overwrite each other; symbol and month segments exist only for
/// operational bucketing. One writer per article id; writes are
/// temp-file-then-rename so concurrent writers to the same path cannot
/// leave a torn file.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative storage path for an article
    fn relative_path(
        article_id: &str,
        symbol: Option<&str>,
        published_at: Option<DateTime<Utc>>,
    ) -> PathBuf {
        let bucket = symbol
            .filter(|s| !s.is_empty())
            .map(sanitize_segment)
            .unwrap_or_else(|| "GENERAL".to_string());
        let month = published_at
            .unwrap_or_else(Utc::now)
            .format("%Y%m")
            .to_string();
        PathBuf::from(bucket).join(month).join(format!("{article_id}.json"))
    }

    /// Persist a payload, returning the relative path stored on the article row
    pub fn save(
        &self,
        article_id: &str,
        symbol: Option<&str>,
        payload: &ContentFile,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let relative = Self::relative_path(article_id, symbol, published_at);
        let absolute = self.root.join(&relative);

        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Whole-file replace: write a sibling temp file, then rename over
        let tmp = absolute.with_extension(format!("tmp.{}", std::process::id()));
        let json = serde_json::to_vec_pretty(payload)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &absolute)?;

        debug!(article_id, path = %relative.display(), "Content file saved");
        Ok(relative.to_string_lossy().to_string())
    }

    /// Read a payload; None when the file is missing or unparseable
    pub fn read(&self, relative_path: &str) -> Option<ContentFile> {
        let absolute = self.root.join(relative_path);
        let raw = std::fs::read(&absolute).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(path = %absolute.display(), "Unparseable content file: {e}");
                None
            }
        }
    }

    /// Delete a content file. Returns true if a file was removed.
    pub fn delete(&self, relative_path: &str) -> bool {
        let absolute = self.root.join(relative_path);
        match std::fs::remove_file(&absolute) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %absolute.display(), "Failed to delete content file: {e}");
                false
            }
        }
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.root.join(relative_path).is_file()
    }

    /// Content files whose on-disk modification time is older than the
    /// retention threshold, with the article id parsed from the filename.
    /// The caller decides deletion based on the owning article's status.
    pub fn list_files_older_than(&self, age_days: u32) -> Result<Vec<(String, String)>> {
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(u64::from(age_days) * 86_400))
            .ok_or_else(|| KingfisherError::InvalidInput("retention overflows".into()))?;

        let mut old_files = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }
            let article_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let relative = match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().to_string(),
                Err(_) => continue,
            };
            old_files.push((relative, article_id));
        }
        Ok(old_files)
    }
}

/// Keep path segments shell- and filesystem-safe
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
