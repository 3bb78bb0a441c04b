// src/index/mod.rs
// Index / embedding writer: chunk, embed, and replace vectors atomically

mod chunking;

pub use chunking::chunk_text;

use crate::db::pool::DatabasePool;
use crate::db::vectors::{count_vectors_sync, replace_vectors_sync, VectorChunk};
use crate::embeddings::Embedder;
use crate::error::{KingfisherError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Result of one index write
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexReport {
    pub chunks_total: usize,
    pub chunks_stored: usize,
}

/// Vector-index seam used by the workflow's embed node
#[async_trait]
pub trait IndexWriter: Send + Sync {
    /// Chunk `content`, embed the chunks, and replace all prior vectors for
    /// `(source_type, source_id)` atomically. If every embedding call fails
    /// the prior vectors are left intact and an error is returned.
    async fn write(
        &self,
        source_type: &str,
        source_id: &str,
        content: &str,
        symbol: Option<&str>,
    ) -> Result<IndexReport>;
}

/// Production writer backed by the embeddings API and the vec_news table.
///
/// Writes for the same `(source_type, source_id)` are serialised through an
/// in-process advisory lock keyed by a digest of the pair; reads stay
/// lock-free.
pub struct EmbeddingWriter {
    pool: Arc<DatabasePool>,
    embedder: Arc<dyn Embedder>,
    locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl EmbeddingWriter {
    pub fn new(pool: Arc<DatabasePool>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            embedder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_key(source_type: &str, source_id: &str) -> u64 {
        let digest = Sha256::digest(format!("{source_type}:{source_id}").as_bytes());
        u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ])
    }

    async fn advisory_lock(&self, key: u64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

#[async_trait]
impl IndexWriter for EmbeddingWriter {
    async fn write(
        &self,
        source_type: &str,
        source_id: &str,
        content: &str,
        symbol: Option<&str>,
    ) -> Result<IndexReport> {
        let chunks = chunk_text(content);
        if chunks.is_empty() {
            return Err(KingfisherError::Embedding("no chunks to embed".into()));
        }

        // Embed before taking the lock; failure leaves prior vectors intact
        let vectors = self.embedder.embed_batch(&chunks).await?;

        let lock = self
            .advisory_lock(Self::lock_key(source_type, source_id))
            .await;
        let _guard = lock.lock().await;

        let vector_chunks: Vec<VectorChunk> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| VectorChunk {
                chunk_index: i as i64,
                chunk_text: text,
                embedding,
            })
            .collect();

        let chunks_total = vector_chunks.len();
        let source_type_owned = source_type.to_string();
        let source_id_owned = source_id.to_string();
        let symbol_owned = symbol.map(str::to_string);

        let chunks_stored = self
            .pool
            .interact(move |conn| {
                replace_vectors_sync(
                    conn,
                    &source_type_owned,
                    &source_id_owned,
                    symbol_owned.as_deref(),
                    &vector_chunks,
                )
            })
            .await?;

        info!(
            source_type,
            source_id,
            chunks_total,
            chunks_stored,
            "vectors replaced"
        );

        Ok(IndexReport {
            chunks_total,
            chunks_stored,
        })
    }
}

/// Placeholder writer for deployments without an embedding provider.
/// Every write fails, so the workflow records embedding_failed instead of
/// silently dropping vectors.
pub struct DisabledIndexWriter;

#[async_trait]
impl IndexWriter for DisabledIndexWriter {
    async fn write(
        &self,
        _source_type: &str,
        _source_id: &str,
        _content: &str,
        _symbol: Option<&str>,
    ) -> Result<IndexReport> {
        Err(KingfisherError::Embedding(
            "no embedding provider configured".into(),
        ))
    }
}

/// Count stored vectors (admin/test surface)
pub async fn vector_count(
    pool: &Arc<DatabasePool>,
    source_type: &str,
    source_id: &str,
) -> Result<i64> {
    let source_type = source_type.to_string();
    let source_id = source_id.to_string();
    pool.interact(move |conn| count_vectors_sync(conn, &source_type, &source_id))
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embedder returning fixed-dimension vectors, optionally failing
    struct FakeEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(KingfisherError::Embedding("all calls failed".into()));
            }
            Ok(texts.iter().map(|_| vec![0.5f32; 1536]).collect())
        }

        fn dimensions(&self) -> usize {
            1536
        }

        fn model_name(&self) -> String {
            "fake".into()
        }
    }

    async fn writer(fail: bool) -> (EmbeddingWriter, Arc<DatabasePool>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("open"));
        let writer = EmbeddingWriter::new(pool.clone(), Arc::new(FakeEmbedder { fail }));
        (writer, pool)
    }

    #[tokio::test]
    async fn test_write_stores_all_chunks() {
        let (writer, pool) = writer(false).await;
        let content = "word ".repeat(2000);

        let report = writer.write("news", "a1", &content, Some("AAPL")).await.expect("write");
        assert!(report.chunks_total > 1);
        assert_eq!(report.chunks_total, report.chunks_stored);
        assert_eq!(
            vector_count(&pool, "news", "a1").await.expect("count"),
            report.chunks_stored as i64
        );
    }

    #[tokio::test]
    async fn test_rewrite_replaces_without_stale_vectors() {
        let (writer, pool) = writer(false).await;
        let long = "word ".repeat(2000);

        let first = writer.write("news", "a1", &long, None).await.expect("write");
        assert!(first.chunks_stored > 1);

        let second = writer.write("news", "a1", "short text", None).await.expect("write");
        assert_eq!(second.chunks_stored, 1);
        assert_eq!(vector_count(&pool, "news", "a1").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_prior_vectors() {
        let (writer, pool) = writer(false).await;
        writer.write("news", "a1", "original content body", None).await.expect("write");

        let failing = EmbeddingWriter::new(pool.clone(), Arc::new(FakeEmbedder { fail: true }));
        let result = failing.write("news", "a1", "new content", None).await;
        assert!(result.is_err());
        assert_eq!(
            vector_count(&pool, "news", "a1").await.expect("count"),
            1,
            "failed re-embedding must not disturb prior vectors"
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_error() {
        let (writer, _) = writer(false).await;
        assert!(writer.write("news", "a1", "   ", None).await.is_err());
    }

    #[test]
    fn test_lock_key_is_stable_per_source() {
        let k1 = EmbeddingWriter::lock_key("news", "a1");
        let k2 = EmbeddingWriter::lock_key("news", "a1");
        let k3 = EmbeddingWriter::lock_key("news", "a2");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
