//! Hybrid schema retrieval and reranking
//!
//! Semantic search over the index store and BM25 over a corpus snapshot are
//! fused with weighted Reciprocal Rank Fusion, then reranked down to the
//! handful of tables the generator sees.

mod candidate;
mod fusion;
mod hybrid;
mod reranker;

pub use candidate::{RankedCandidate, RetrievalCandidate, DEFAULT_HYBRID_SCORE};
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::HybridRetriever;
pub use reranker::{
    build_scorer, normalize, CrossEncoderScorer, LexicalSignalScorer, LlmSelectionScorer,
    RelevanceScorer, RerankError, RerankStrategy, Reranker,
};

use crate::embedding::{EmbeddingError, KeywordIndexError};
use crate::index_store::IndexStoreError;
use thiserror::Error;

/// Retrieval failures. None of these are retried within a request.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Index store unavailable: {0}")]
    Store(#[from] IndexStoreError),

    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Keyword search failed: {0}")]
    Keyword(#[from] KeywordIndexError),

    #[error("Invalid fusion configuration: {0}")]
    Fusion(#[from] FusionError),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}
