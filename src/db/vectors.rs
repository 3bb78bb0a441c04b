// src/db/vectors.rs
// Vector store operations on the vec_news table (sync functions for pool.interact)

use anyhow::Result;
use rusqlite::{Connection, params};

/// Convert an embedding to the little-endian byte layout sqlite-vec expects
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// One chunk ready for insertion
#[derive(Debug, Clone)]
pub struct VectorChunk {
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// Delete all vectors for a (source_type, source_id). Returns rows deleted.
pub fn delete_vectors_sync(conn: &Connection, source_type: &str, source_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM vec_news WHERE source_type = ? AND source_id = ?",
        params![source_type, source_id],
    )?;
    Ok(deleted)
}

/// Insert one chunk vector
pub fn insert_vector_sync(
    conn: &Connection,
    source_type: &str,
    source_id: &str,
    symbol: Option<&str>,
    chunk: &VectorChunk,
) -> Result<()> {
    conn.execute(
        "INSERT INTO vec_news (embedding, source_type, source_id, chunk_index, chunk_text, symbol)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            embedding_to_bytes(&chunk.embedding),
            source_type,
            source_id,
            chunk.chunk_index,
            chunk.chunk_text,
            symbol,
        ],
    )?;
    Ok(())
}

/// Replace all vectors for a source atomically.
///
/// Runs DELETE + INSERTs inside one transaction so readers never observe a
/// partial set. Returns the number of chunks stored.
pub fn replace_vectors_sync(
    conn: &Connection,
    source_type: &str,
    source_id: &str,
    symbol: Option<&str>,
    chunks: &[VectorChunk],
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    delete_vectors_sync(&tx, source_type, source_id)?;
    for chunk in chunks {
        insert_vector_sync(&tx, source_type, source_id, symbol, chunk)?;
    }
    tx.commit()?;
    Ok(chunks.len())
}

/// Count vectors for a source
pub fn count_vectors_sync(conn: &Connection, source_type: &str, source_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM vec_news WHERE source_type = ? AND source_id = ?",
        params![source_type, source_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}
