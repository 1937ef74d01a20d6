//! Candidate records passed from retrieval to reranking and generation

use crate::index_store::{DocumentKind, DocumentMetadata, SchemaDocument};
use serde::Serialize;

/// Upstream score assumed for candidates the semantic search never saw
pub const DEFAULT_HYBRID_SCORE: f32 = 0.5;

/// One fused retrieval hit
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Semantic similarity `1 / (1 + distance)`, absent for lexical-only hits
    pub similarity: Option<f32>,
    /// Weighted rank fusion score
    pub fusion_score: f32,
}

impl RetrievalCandidate {
    pub fn from_document(document: SchemaDocument, similarity: Option<f32>, fusion_score: f32) -> Self {
        Self {
            id: document.id,
            content: document.text,
            metadata: document.metadata,
            similarity,
            fusion_score,
        }
    }

    /// Score handed to the reranker as the upstream signal
    pub fn hybrid_score(&self) -> f32 {
        self.similarity.unwrap_or(DEFAULT_HYBRID_SCORE)
    }

    pub fn table_name(&self) -> Option<&str> {
        self.metadata.table_name.as_deref()
    }

    /// True for per-table schema documents, false for the glossary
    pub fn is_table(&self) -> bool {
        self.metadata.kind == DocumentKind::TableSchema && self.table_name().is_some()
    }
}

/// Candidate after reranking; all three scores lie in [0, 1]
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: RetrievalCandidate,
    pub hybrid_score: f32,
    pub rerank_score: f32,
    pub final_score: f32,
}

impl RankedCandidate {
    pub fn table_name(&self) -> Option<&str> {
        self.candidate.table_name()
    }

    pub fn content(&self) -> &str {
        &self.candidate.content
    }
}
