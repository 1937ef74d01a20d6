//! Chroma v2 HTTP index store

use super::{check_batch, DocumentMetadata, IndexHit, IndexStore, IndexStoreError, SchemaDocument};
use crate::config::IndexStoreConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Collection-scoped client for a Chroma server
pub struct ChromaIndexStore {
    client: reqwest::Client,
    /// `{url}/api/v2/tenants/{tenant}/databases/{database}`
    base_url: String,
    collection_name: String,
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<DocumentMetadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<DocumentMetadata>>>,
}

impl ChromaIndexStore {
    /// Resolve (or create) the configured collection
    pub async fn connect(config: &IndexStoreConfig) -> Result<Self, IndexStoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexStoreError::Unreachable(e.to_string()))?;

        let base_url = format!(
            "{}/api/v2/tenants/{}/databases/{}",
            config.url.trim_end_matches('/'),
            config.tenant,
            config.database
        );

        let mut store = Self {
            client,
            base_url,
            collection_name: config.collection.clone(),
            collection_id: String::new(),
        };

        store.collection_id = match store.lookup_collection().await {
            Ok(id) => id,
            Err(IndexStoreError::CollectionNotFound(_)) => store.create_collection().await?,
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Connected to Chroma collection {} ({})",
            store.collection_name,
            store.collection_id
        );

        Ok(store)
    }

    async fn lookup_collection(&self) -> Result<String, IndexStoreError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexStoreError::Unreachable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexStoreError::CollectionNotFound(
                self.collection_name.clone(),
            ));
        }

        let info: CollectionInfo = Self::read_json(response).await?;
        Ok(info.id)
    }

    async fn create_collection(&self) -> Result<String, IndexStoreError> {
        tracing::info!("Creating Chroma collection {}", self.collection_name);

        let url = format!("{}/collections", self.base_url);
        let payload = json!({
            "name": self.collection_name,
            "metadata": {"description": "Database schema documents for text-to-SQL"},
            "configuration": {"hnsw": {"space": "cosine"}},
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| IndexStoreError::Unreachable(e.to_string()))?;

        let info: CollectionInfo = Self::read_json(response).await?;
        Ok(info.id)
    }

    fn collection_url(&self, action: &str) -> String {
        format!(
            "{}/collections/{}/{}",
            self.base_url, self.collection_id, action
        )
    }

    async fn post(&self, action: &str, payload: serde_json::Value) -> Result<reqwest::Response, IndexStoreError> {
        self.client
            .post(self.collection_url(action))
            .json(&payload)
            .send()
            .await
            .map_err(|e| IndexStoreError::Unreachable(e.to_string()))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, IndexStoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexStoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| IndexStoreError::InvalidResponse(e.to_string()))
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), IndexStoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(IndexStoreError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn write_payload(documents: &[SchemaDocument], embeddings: &[Vec<f32>]) -> serde_json::Value {
        json!({
            "ids": documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "embeddings": embeddings,
            "documents": documents.iter().map(|d| d.text.as_str()).collect::<Vec<_>>(),
            "metadatas": documents.iter().map(|d| &d.metadata).collect::<Vec<_>>(),
        })
    }
}

#[async_trait]
impl IndexStore for ChromaIndexStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexStoreError> {
        let payload = json!({
            "query_embeddings": [embedding],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });

        let response = self.post("query", payload).await?;
        let result: QueryResponse = Self::read_json(response).await?;

        let ids = result.ids.into_iter().next().unwrap_or_default();
        let documents = result
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = result
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();
        let distances = result
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();

        let hits = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| IndexHit {
                document: SchemaDocument {
                    id,
                    text: documents.get(i).cloned().flatten().unwrap_or_default(),
                    metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
                },
                distance: distances.get(i).copied().flatten().unwrap_or(1.0).max(0.0),
            })
            .collect();

        Ok(hits)
    }

    async fn fetch_all(&self, limit: usize) -> Result<Vec<SchemaDocument>, IndexStoreError> {
        let payload = json!({
            "limit": limit,
            "include": ["documents", "metadatas"],
        });

        let response = self.post("get", payload).await?;
        let result: GetResponse = Self::read_json(response).await?;

        let documents = result.documents.unwrap_or_default();
        let metadatas = result.metadatas.unwrap_or_default();

        Ok(result
            .ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| SchemaDocument {
                id,
                text: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect())
    }

    async fn add(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        check_batch(documents, embeddings)?;
        if documents.is_empty() {
            return Ok(());
        }

        let response = self
            .post("add", Self::write_payload(documents, embeddings))
            .await?;
        Self::expect_success(response).await
    }

    async fn update(
        &self,
        documents: &[SchemaDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexStoreError> {
        check_batch(documents, embeddings)?;
        if documents.is_empty() {
            return Ok(());
        }

        let response = self
            .post("update", Self::write_payload(documents, embeddings))
            .await?;
        Self::expect_success(response).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexStoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let response = self.post("delete", json!({ "ids": ids })).await?;
        Self::expect_success(response).await
    }

    fn name(&self) -> &str {
        "chroma"
    }
}
