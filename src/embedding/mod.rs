//! Embedding models and the lexical index
//!
//! - `EmbeddingProvider` trait with a local FastEmbed implementation
//!   (all-MiniLM-L6-v2, 384-dim by default); the same model must be used for
//!   indexing and for queries
//! - `KeywordIndex`, an in-memory Tantivy BM25 index over a corpus snapshot

mod keyword_index;
mod provider;

pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
