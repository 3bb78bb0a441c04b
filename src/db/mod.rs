// src/db/mod.rs
// Database layer: pooled SQLite access and per-table sync operations

pub mod articles;
pub mod feeds;
pub mod pool;
pub mod schema;
pub mod settings;
pub mod stats;
pub mod trace;
pub mod types;
pub mod vectors;

pub use pool::DatabasePool;
pub use types::{Article, ContentStatus, Feed, FilterStatus, RelatedEntity};
