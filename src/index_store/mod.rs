//! Schema index store
//!
//! The vector-searchable document store that holds one document per table
//! plus the business glossary. The core only reads from it during a request;
//! the indexer owns writes.

mod chroma;
mod memory;

pub use chroma::ChromaIndexStore;
pub use memory::MemoryIndexStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexStoreError {
    #[error("Index store unreachable: {0}")]
    Unreachable(String),

    #[error("Index store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid response from index store: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Kind of document stored in the schema collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    TableSchema,
    #[serde(alias = "business_context")]
    BusinessGlossary,
    #[serde(other)]
    Other,
}

/// Metadata attached to every indexed document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "type", default)]
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_description: Option<String>,
    /// JSON object of column name -> {data_type, description, sample_values}
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns_json: Option<String>,
    /// JSON array of every sample value collected for the table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_values_json: Option<String>,
    /// BLAKE3 hash of the document text, used to skip unchanged re-syncs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// One indexed document. Immutable once indexed; replaced wholesale on re-sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl SchemaDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }

    /// Table name for table documents, `None` for the glossary
    pub fn table_name(&self) -> Option<&str> {
        self.metadata.table_name.as_deref()
    }
}

/// Nearest-neighbour hit with its raw (non-negative) distance
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub document: SchemaDocument,
    pub distance: f32,
}

/// Collection-scoped document store with vector search
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Nearest-neighbour search, closest first
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexStoreError>;

    /// Bulk fetch of up to `limit` documents with their metadata
    async fn fetch_all(&self, limit: usize) -> Result<Vec<SchemaDocument>, IndexStoreError>;

    /// Add new documents; `embeddings[i]` belongs to `documents[i]`
    async fn add(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError>;

    /// Replace existing documents by id
    async fn update(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError>;

    /// Delete documents by id
    async fn delete(&self, ids: &[String]) -> Result<(), IndexStoreError>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;
}

pub(crate) fn check_batch(
    documents: &[SchemaDocument],
    embeddings: &[Vec<f32>],
) -> Result<(), IndexStoreError> {
    if documents.len() != embeddings.len() {
        return Err(IndexStoreError::InvalidInput(format!(
            "{} documents but {} embeddings",
            documents.len(),
            embeddings.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_tolerates_foreign_fields() {
        let json = serde_json::json!({
            "type": "business_context",
            "domain": "rentals",
            "patterns_count": 4,
        });

        let metadata: DocumentMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(metadata.kind, DocumentKind::BusinessGlossary);
        assert!(metadata.table_name.is_none());
    }

    #[test]
    fn test_metadata_skips_empty_fields() {
        let metadata = DocumentMetadata {
            table_name: Some("TENANTS".to_string()),
            ..Default::default()
        };

        let value = serde_json::to_value(&metadata).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["type"], "table_schema");
        assert_eq!(object["table_name"], "TENANTS");
    }

    #[test]
    fn test_unknown_kind() {
        let metadata: DocumentMetadata =
            serde_json::from_value(serde_json::json!({"type": "query_example"})).unwrap();
        assert_eq!(metadata.kind, DocumentKind::Other);
    }
}
