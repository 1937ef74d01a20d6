//! In-process index store using exact cosine distance

use super::{check_batch, IndexHit, IndexStore, IndexStoreError, SchemaDocument};
use async_trait::async_trait;
use tokio::sync::RwLock;

struct StoredDocument {
    document: SchemaDocument,
    embedding: Vec<f32>,
}

/// Index store held entirely in memory.
///
/// Distances are `1 - cosine_similarity`, matching a cosine-space Chroma
/// collection. Search is exhaustive, which is fine for schema-sized corpora.
#[derive(Default)]
pub struct MemoryIndexStore {
    documents: RwLock<Vec<StoredDocument>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    (1.0 - dot / (mag_a * mag_b)).max(0.0)
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexStoreError> {
        let documents = self.documents.read().await;

        let mut hits: Vec<IndexHit> = documents
            .iter()
            .map(|stored| IndexHit {
                document: stored.document.clone(),
                distance: cosine_distance(embedding, &stored.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    async fn fetch_all(&self, limit: usize) -> Result<Vec<SchemaDocument>, IndexStoreError> {
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .take(limit)
            .map(|stored| stored.document.clone())
            .collect())
    }

    async fn add(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        check_batch(documents, embeddings)?;

        let mut stored = self.documents.write().await;
        for (document, embedding) in documents.iter().zip(embeddings) {
            if stored.iter().any(|s| s.document.id == document.id) {
                return Err(IndexStoreError::InvalidInput(format!(
                    "Document already exists: {}",
                    document.id
                )));
            }
            stored.push(StoredDocument {
                document: document.clone(),
                embedding: embedding.clone(),
            });
        }

        Ok(())
    }

    async fn update(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        check_batch(documents, embeddings)?;

        let mut stored = self.documents.write().await;
        for (document, embedding) in documents.iter().zip(embeddings) {
            let existing = stored
                .iter_mut()
                .find(|s| s.document.id == document.id)
                .ok_or_else(|| {
                    IndexStoreError::InvalidInput(format!("Unknown document: {}", document.id))
                })?;
            existing.document = document.clone();
            existing.embedding = embedding.clone();
        }

        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexStoreError> {
        let mut stored = self.documents.write().await;
        stored.retain(|s| !ids.contains(&s.document.id));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
