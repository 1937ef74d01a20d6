//! Hybrid search combining semantic and keyword search

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider, KeywordIndex};
use crate::index_store::{DocumentKind, IndexStore, SchemaDocument};
use crate::retrieval::{reciprocal_rank_fusion, FusionConfig, RetrievalCandidate, RetrievalError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hybrid retriever over the schema index.
///
/// The keyword side is built once from a corpus snapshot at connect time and
/// never refreshed; a re-indexed store is picked up by a new instance.
pub struct HybridRetriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    keyword_index: KeywordIndex,
    corpus: HashMap<String, SchemaDocument>,
    glossary: Option<SchemaDocument>,
    fusion: FusionConfig,
    k: usize,
    timeout: Duration,
}

impl HybridRetriever {
    /// Snapshot the corpus and build the keyword index
    pub async fn connect(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
        corpus_limit: usize,
        timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let fusion = FusionConfig::new(config.rrf_k, config.semantic_weight, config.keyword_weight)?;

        let snapshot = tokio::time::timeout(timeout, store.fetch_all(corpus_limit))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "corpus snapshot",
                secs: timeout.as_secs(),
            })??;

        let keyword_index = KeywordIndex::build(&snapshot)?;

        let glossary = snapshot
            .iter()
            .find(|d| d.metadata.kind == DocumentKind::BusinessGlossary)
            .cloned();

        tracing::info!(
            "Hybrid retriever ready: {} documents from {} (glossary: {})",
            snapshot.len(),
            store.name(),
            glossary.is_some()
        );

        let corpus = snapshot.into_iter().map(|d| (d.id.clone(), d)).collect();

        Ok(Self {
            store,
            embedder,
            keyword_index,
            corpus,
            glossary,
            fusion,
            k: config.k,
            timeout,
        })
    }

    /// Fused candidates, best first.
    ///
    /// Each sub-search returns at most `k` hits; the union may be shorter
    /// than `2k` because hits found by both are merged.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let semantic_hits = self.semantic_search(query).await?;
        let keyword_ids = self.keyword_search(query)?;

        let semantic_ids: Vec<String> = semantic_hits.iter().map(|(d, _)| d.id.clone()).collect();
        let fused = reciprocal_rank_fusion(&semantic_ids, &keyword_ids, &self.fusion);

        let mut semantic_by_id: HashMap<String, (SchemaDocument, f32)> = semantic_hits
            .into_iter()
            .map(|(d, similarity)| (d.id.clone(), (d, similarity)))
            .collect();

        let mut candidates = Vec::with_capacity(fused.len());
        for (id, fusion_score) in fused {
            if let Some((document, similarity)) = semantic_by_id.remove(&id) {
                candidates.push(RetrievalCandidate::from_document(
                    document,
                    Some(similarity),
                    fusion_score,
                ));
            } else if let Some(document) = self.corpus.get(&id) {
                candidates.push(RetrievalCandidate::from_document(
                    document.clone(),
                    None,
                    fusion_score,
                ));
            }
        }

        tracing::debug!(
            "Hybrid search: {} semantic, {} keyword, {} fused",
            semantic_ids.len(),
            keyword_ids.len(),
            candidates.len()
        );

        Ok(candidates)
    }

    /// Business glossary document from the snapshot, if indexed
    pub fn glossary(&self) -> Option<&SchemaDocument> {
        self.glossary.as_ref()
    }

    pub fn corpus_size(&self) -> usize {
        self.corpus.len()
    }

    /// Nearest neighbours with `similarity = 1 / (1 + distance)`
    async fn semantic_search(&self, query: &str) -> Result<Vec<(SchemaDocument, f32)>, RetrievalError> {
        let embedder = self.embedder.clone();
        let text = query.to_string();
        let embedding = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || embedder.embed(&text)),
        )
        .await
        .map_err(|_| RetrievalError::Timeout {
            stage: "query embedding",
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| EmbeddingError::GenerationError(e.to_string()))??;

        let hits = tokio::time::timeout(self.timeout, self.store.query(&embedding, self.k))
            .await
            .map_err(|_| RetrievalError::Timeout {
                stage: "index store query",
                secs: self.timeout.as_secs(),
            })??;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let similarity = 1.0 / (1.0 + hit.distance.max(0.0));
                (hit.document, similarity)
            })
            .collect())
    }

    fn keyword_search(&self, query: &str) -> Result<Vec<String>, RetrievalError> {
        let results = self.keyword_index.search(query, self.k)?;
        Ok(results.into_iter().map(|r| r.doc_id).collect())
    }
}
