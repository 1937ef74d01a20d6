//! One-shot schema indexer
//!
//! Renders one document per table, plus the business glossary, and brings
//! the index store in line with them. Documents are compared by the BLAKE3
//! hash of their text, so an unchanged table is neither re-embedded nor
//! rewritten.

use crate::database::{ExecutionError, TableDescription};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index_store::{
    DocumentKind, DocumentMetadata, IndexStore, IndexStoreError, SchemaDocument,
};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Id of the glossary document
pub const GLOSSARY_DOCUMENT_ID: &str = "business_glossary";

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error(transparent)]
    Store(#[from] IndexStoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to describe database schema: {0}")]
    Database(#[from] ExecutionError),

    #[error("Failed to load business glossary {path}: {message}")]
    Glossary { path: String, message: String },

    #[error("Indexing task failed: {0}")]
    TaskFailed(String),
}

/// Domain knowledge indexed alongside the tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessGlossary {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_purpose: String,
    /// Phrase users say -> what it means in the schema
    #[serde(default)]
    pub entity_patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub business_rules: Vec<String>,
    /// Question keyword -> how to interpret it in SQL
    #[serde(default)]
    pub query_context: BTreeMap<String, String>,
    /// Optional per-table descriptions, keyed by table name
    #[serde(default)]
    pub tables: BTreeMap<String, String>,
}

impl BusinessGlossary {
    pub fn load(path: &Path) -> Result<Self, IndexingError> {
        let error = |message: String| IndexingError::Glossary {
            path: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| error(e.to_string()))
    }

    fn table_description(&self, table: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, description)| description.as_str())
    }

    pub fn to_document(&self) -> SchemaDocument {
        let mut lines = vec![
            format!("Business domain: {}", self.domain),
            format!("System description: {}", self.description),
        ];
        if !self.system_purpose.is_empty() {
            lines.push(format!("System purpose: {}", self.system_purpose));
        }

        if !self.entity_patterns.is_empty() {
            lines.push("\nEntity patterns:".to_string());
            for (pattern, meaning) in &self.entity_patterns {
                lines.push(format!("- {}: {}", pattern, meaning));
            }
        }
        if !self.business_rules.is_empty() {
            lines.push("\nBusiness rules:".to_string());
            for rule in &self.business_rules {
                lines.push(format!("- {}", rule));
            }
        }
        if !self.query_context.is_empty() {
            lines.push("\nQuery interpretation guide:".to_string());
            for (keyword, interpretation) in &self.query_context {
                lines.push(format!("- '{}': {}", keyword, interpretation));
            }
        }

        let text = lines.join("\n");
        let metadata = DocumentMetadata {
            kind: DocumentKind::BusinessGlossary,
            content_hash: Some(content_hash(&text)),
            last_updated: Some(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };
        SchemaDocument::new(GLOSSARY_DOCUMENT_ID, text, metadata)
    }
}

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn table_document_id(table: &str) -> String {
    format!("schema_{}", table)
}

/// Retrieval text for one table: name, description, typed columns with
/// sample values and an example query
pub fn table_document(table: &TableDescription, description: Option<&str>) -> SchemaDocument {
    let description = description
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} table", table.name));

    let mut lines = vec![
        format!("Table: {}", table.name),
        format!("Description: {}", description),
        "Columns:".to_string(),
    ];

    let mut columns = serde_json::Map::new();
    let mut all_samples = Vec::new();

    for column in &table.columns {
        let mut flags = vec![column.data_type.clone()];
        if column.primary_key {
            flags.push("primary key".to_string());
        } else if !column.nullable {
            flags.push("not null".to_string());
        }

        let mut line = format!("- {} ({})", column.name, flags.join(", "));
        if !column.sample_values.is_empty() {
            line.push_str(&format!(" - sample values: [{}]", column.sample_values.join(", ")));
        }
        lines.push(line);

        columns.insert(
            column.name.clone(),
            serde_json::json!({
                "data_type": column.data_type,
                "nullable": column.nullable,
                "primary_key": column.primary_key,
                "sample_values": column.sample_values,
            }),
        );
        all_samples.extend(column.sample_values.iter().cloned());
    }

    let preview: Vec<&str> = table.columns.iter().take(5).map(|c| c.name.as_str()).collect();
    if !preview.is_empty() {
        lines.push(format!("Example: SELECT {} FROM {}", preview.join(", "), table.name));
    }

    let text = lines.join("\n");
    let metadata = DocumentMetadata {
        kind: DocumentKind::TableSchema,
        table_name: Some(table.name.clone()),
        table_description: Some(description),
        columns_json: Some(serde_json::Value::Object(columns).to_string()),
        sample_values_json: Some(serde_json::Value::from(all_samples).to_string()),
        content_hash: Some(content_hash(&text)),
        last_updated: Some(chrono::Utc::now().to_rfc3339()),
    };

    SchemaDocument::new(table_document_id(&table.name), text, metadata)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

pub struct SchemaIndexer {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    corpus_limit: usize,
}

impl SchemaIndexer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        corpus_limit: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            corpus_limit,
        }
    }

    /// Add new, update changed and delete stale documents
    pub async fn sync(
        &self,
        tables: &[TableDescription],
        glossary: Option<&BusinessGlossary>,
    ) -> Result<SyncReport, IndexingError> {
        let mut desired: Vec<SchemaDocument> = tables
            .iter()
            .map(|table| {
                let description = glossary.and_then(|g| g.table_description(&table.name));
                table_document(table, description)
            })
            .collect();
        if let Some(glossary) = glossary {
            desired.push(glossary.to_document());
        }

        let existing: HashMap<String, Option<String>> = {
            let mut map = HashMap::new();
            for doc in self.store.fetch_all(self.corpus_limit).await? {
                map.insert(doc.id, doc.metadata.content_hash);
            }
            map
        };

        let mut report = SyncReport::default();
        let mut to_add = Vec::new();
        let mut to_update = Vec::new();

        for doc in desired.iter() {
            match existing.get(&doc.id) {
                None => to_add.push(doc.clone()),
                Some(hash) if hash.as_ref() != doc.metadata.content_hash.as_ref() => {
                    to_update.push(doc.clone())
                }
                Some(_) => report.unchanged += 1,
            }
        }

        let wanted: HashSet<&str> = desired.iter().map(|d| d.id.as_str()).collect();
        let stale: Vec<String> = existing
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();

        if !to_add.is_empty() {
            let embeddings = self.embed(&to_add).await?;
            self.store.add(&to_add, &embeddings).await?;
            report.added = to_add.len();
        }
        if !to_update.is_empty() {
            let embeddings = self.embed(&to_update).await?;
            self.store.update(&to_update, &embeddings).await?;
            report.updated = to_update.len();
        }
        if !stale.is_empty() {
            self.store.delete(&stale).await?;
            report.removed = stale.len();
        }

        tracing::info!(
            "Index sync on {}: {} added, {} updated, {} unchanged, {} removed",
            self.store.name(),
            report.added,
            report.updated,
            report.unchanged,
            report.removed
        );

        Ok(report)
    }

    async fn embed(&self, documents: &[SchemaDocument]) -> Result<Vec<Vec<f32>>, IndexingError> {
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embedder = self.embedder.clone();

        tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| IndexingError::TaskFailed(e.to_string()))?
            .map_err(IndexingError::from)
    }
}
