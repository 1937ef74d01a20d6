/// Tantivy keyword index over a schema corpus snapshot
use crate::index_store::SchemaDocument;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, ReloadPolicy};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Search result with document id and BM25 score
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    pub doc_id: String,
    pub score: f32,
}

/// In-memory BM25 index.
///
/// Built once from a full corpus snapshot and never mutated afterwards, so
/// concurrent readers need no locking. A re-indexed store is picked up by
/// building a new instance.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    len: usize,
}

impl KeywordIndex {
    /// Build the index from a document snapshot
    pub fn build(documents: &[SchemaDocument]) -> Result<Self, KeywordIndexError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("doc_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);

        let mut writer = index
            .writer_with_num_threads(1, 15_000_000)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        for document in documents {
            writer
                .add_document(doc!(
                    id_field => document.id.as_str(),
                    text_field => searchable_text(document),
                ))
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
            len: documents.len(),
        })
    }

    /// BM25 search; free text is reduced to OR-ed terms first
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let terms = sanitize_query(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let query = query_parser
            .parse_query(&terms)
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let doc_id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing document id".to_string())
                })?
                .to_string();

            results.push(KeywordSearchResult { doc_id, score });
        }

        Ok(results)
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Text and table name; identifiers like `RENT_PAYMENTS` are also indexed
/// as separate words so "rent payments" matches them.
fn searchable_text(document: &SchemaDocument) -> String {
    let mut text = document.text.clone();
    if let Some(table) = document.table_name() {
        text.push('\n');
        text.push_str(&table.replace('_', " "));
    }
    text
}

/// Keep lowercased alphanumeric runs only, so neither query syntax
/// characters nor `AND`/`OR`/`NOT` operators reach the parser
fn sanitize_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
