//! In-process fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sqlrag::config::Config;
use sqlrag::database::{ExecutionError, QueryRows, SqlExecutor};
use sqlrag::embedding::{EmbeddingError, EmbeddingProvider};
use sqlrag::generation::{
    Completion, CompletionRequest, LanguageModel, LlmError, PromptTemplate, SqlGenerator,
    TokenUsage,
};
use sqlrag::index_store::{
    DocumentKind, DocumentMetadata, IndexHit, IndexStore, IndexStoreError, MemoryIndexStore,
    SchemaDocument,
};
use sqlrag::orchestrator::{Orchestrator, StaticSummarizer};
use sqlrag::retrieval::{HybridRetriever, LexicalSignalScorer, Reranker};
use sqlrag::validation::{SchemaCatalog, SchemaValidator};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DIMENSION: usize = 64;

/// Hashes lowercase words into a fixed number of buckets
pub struct BagOfWordsEmbedder;

impl EmbeddingProvider for BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % DIMENSION] += 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }
}

/// Replays canned completions in order and records every prompt
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))?;
        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Structured generator output as the model would return it
pub fn sql_reply(sql: &str, confidence: f32) -> String {
    serde_json::json!({
        "sql": sql,
        "analysis": "Tenants live in TENANTS.",
        "explanation": "Reads the requested columns.",
        "confidence": confidence,
    })
    .to_string()
}

/// Executor with queued results; records the SQL it was asked to run
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<QueryRows, ExecutionError>>>,
    pub executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<Result<QueryRows, ExecutionError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryRows, ExecutionError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryRows::default()))
    }
}

/// Executor whose every call panics
pub struct PanickingExecutor {
    calls: AtomicUsize,
}

impl PanickingExecutor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for PanickingExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryRows, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("driver crashed while running {}", sql);
    }
}

/// Delegates to another store and counts vector queries
pub struct CountingStore {
    inner: Arc<dyn IndexStore>,
    queries: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn IndexStore>) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexStore for CountingStore {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexStoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(embedding, k).await
    }

    async fn fetch_all(&self, limit: usize) -> Result<Vec<SchemaDocument>, IndexStoreError> {
        self.inner.fetch_all(limit).await
    }

    async fn add(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        self.inner.add(documents, embeddings).await
    }

    async fn update(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        self.inner.update(documents, embeddings).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexStoreError> {
        self.inner.delete(ids).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Serves its corpus snapshot but cannot answer vector queries
pub struct UnreachableQueryStore {
    documents: Vec<SchemaDocument>,
}

impl UnreachableQueryStore {
    pub fn new(documents: Vec<SchemaDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl IndexStore for UnreachableQueryStore {
    async fn query(&self, _: &[f32], _: usize) -> Result<Vec<IndexHit>, IndexStoreError> {
        Err(IndexStoreError::Unreachable(
            "connection refused (localhost:8000)".to_string(),
        ))
    }

    async fn fetch_all(&self, limit: usize) -> Result<Vec<SchemaDocument>, IndexStoreError> {
        Ok(self.documents.iter().take(limit).cloned().collect())
    }

    async fn add(&self, _: &[SchemaDocument], _: &[Vec<f32>]) -> Result<(), IndexStoreError> {
        Ok(())
    }

    async fn update(&self, _: &[SchemaDocument], _: &[Vec<f32>]) -> Result<(), IndexStoreError> {
        Ok(())
    }

    async fn delete(&self, _: &[String]) -> Result<(), IndexStoreError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

pub fn table_doc(table: &str, columns: &[&str]) -> SchemaDocument {
    let text = format!(
        "Table: {}\nColumns:\n{}\nExample: SELECT * FROM {} LIMIT 10",
        table,
        columns
            .iter()
            .map(|c| format!("- {} (TEXT)", c))
            .collect::<Vec<_>>()
            .join("\n"),
        table
    );
    SchemaDocument::new(
        format!("schema_{}", table),
        text,
        DocumentMetadata {
            kind: DocumentKind::TableSchema,
            table_name: Some(table.to_string()),
            ..Default::default()
        },
    )
}

/// TENANTS(ID, NAME) and UNITS(ID, UNIT_NO, FLOOR)
pub fn rental_documents() -> Vec<SchemaDocument> {
    vec![
        table_doc("TENANTS", &["ID", "NAME"]),
        table_doc("UNITS", &["ID", "UNIT_NO", "FLOOR"]),
    ]
}

pub fn rental_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .with_table("TENANTS", ["ID", "NAME"])
        .with_table("UNITS", ["ID", "UNIT_NO", "FLOOR"])
}

pub async fn memory_store(documents: &[SchemaDocument]) -> Arc<dyn IndexStore> {
    let store = MemoryIndexStore::new();
    let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
    let embeddings = BagOfWordsEmbedder.embed_batch(&texts).unwrap();
    store.add(documents, &embeddings).await.unwrap();
    Arc::new(store)
}

pub fn rows(columns: &[&str], values: Vec<Vec<serde_json::Value>>) -> QueryRows {
    QueryRows {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: values,
        truncated: false,
    }
}

/// Orchestrator over fakes: lexical reranking, static summaries, 3 attempts
pub async fn orchestrator(
    store: Arc<dyn IndexStore>,
    model: Arc<ScriptedModel>,
    executor: Arc<dyn SqlExecutor>,
) -> Orchestrator {
    let config = Config::default();

    let retriever = HybridRetriever::connect(
        store,
        Arc::new(BagOfWordsEmbedder),
        &config.retrieval,
        config.index_store.corpus_limit,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let reranker = Reranker::new(Arc::new(LexicalSignalScorer), &config.reranker);
    let generator = SqlGenerator::new(
        model,
        PromptTemplate::default(),
        0.0,
        Duration::from_secs(5),
    );
    let validator = SchemaValidator::with_catalog(rental_catalog(), Vec::new()).unwrap();

    Orchestrator::new(
        Arc::new(retriever),
        reranker,
        generator,
        Arc::new(validator),
        executor,
        Arc::new(StaticSummarizer),
        config.orchestrator.max_attempts,
    )
}
