//! Wiring of configured components
//!
//! [`Services`] opens the target database, the embedding model and the index
//! store once, then hands out the validator, indexer and orchestrator built
//! on top of them.

use crate::config::{expand_path, Config};
use crate::database::SqliteDatabase;
use crate::embedding::{EmbeddingProvider, FastEmbedProvider};
use crate::error::{Result, SqlRagError};
use crate::generation::{LanguageModel, OpenAiCompatibleModel, PromptTemplate, SqlGenerator};
use crate::index_store::{ChromaIndexStore, IndexStore, MemoryIndexStore};
use crate::indexing::{BusinessGlossary, SchemaIndexer, SyncReport};
use crate::orchestrator::{LlmSummarizer, Orchestrator, StaticSummarizer, Summarizer};
use crate::retrieval::{build_scorer, HybridRetriever, Reranker};
use crate::validation::SchemaValidator;
use std::sync::Arc;
use std::time::Duration;

pub struct Services {
    pub config: Config,
    pub database: Arc<SqliteDatabase>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn IndexStore>,
}

impl Services {
    /// Open every configured collaborator. The in-process `memory` index
    /// starts empty, so it is synced from the database straight away.
    pub async fn open(mut config: Config) -> Result<Self> {
        config.database.path = expand_path(&config.database.path)?;
        let database = Arc::new(SqliteDatabase::open(&config.database)?);

        let model_name = config.embedding.model.clone();
        let provider = tokio::task::spawn_blocking(move || FastEmbedProvider::new(&model_name))
            .await
            .map_err(|e| SqlRagError::Other(e.into()))??;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(provider);

        let store: Arc<dyn IndexStore> = match config.index_store.backend.as_str() {
            "memory" => Arc::new(MemoryIndexStore::new()),
            _ => Arc::new(ChromaIndexStore::connect(&config.index_store).await?),
        };

        let services = Self {
            config,
            database,
            embedder,
            store,
        };

        if services.config.index_store.backend == "memory" {
            services.sync_index().await?;
        }

        Ok(services)
    }

    /// Run the schema indexer once
    pub async fn sync_index(&self) -> Result<SyncReport> {
        let glossary = match &self.config.indexing.glossary_file {
            Some(path) => Some(BusinessGlossary::load(&expand_path(path)?)?),
            None => None,
        };

        let database = self.database.clone();
        let samples = self.config.indexing.sample_values;
        let tables = tokio::task::spawn_blocking(move || database.describe_all(samples))
            .await
            .map_err(|e| SqlRagError::Other(e.into()))??;

        let indexer = SchemaIndexer::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.index_store.corpus_limit,
        );
        Ok(indexer.sync(&tables, glossary.as_ref()).await?)
    }

    pub fn validator(&self) -> Result<SchemaValidator> {
        Ok(SchemaValidator::load(
            self.database.clone(),
            self.config.validation.column_aliases.clone(),
        )?)
    }

    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>> {
        Ok(Arc::new(OpenAiCompatibleModel::from_config(&self.config.llm)?))
    }

    pub async fn retriever(&self) -> Result<HybridRetriever> {
        Ok(HybridRetriever::connect(
            self.store.clone(),
            self.embedder.clone(),
            &self.config.retrieval,
            self.config.index_store.corpus_limit,
            Duration::from_secs(self.config.index_store.timeout_secs),
        )
        .await?)
    }

    pub async fn orchestrator(&self) -> Result<Orchestrator> {
        let model = self.language_model()?;
        let retriever = Arc::new(self.retriever().await?);

        let scorer = build_scorer(&self.config.reranker, model.clone())?;
        let reranker = Reranker::new(scorer, &self.config.reranker);

        let template = PromptTemplate::load(self.config.llm.prompt_file.as_deref())?;
        let generator = SqlGenerator::new(
            model.clone(),
            template,
            self.config.llm.temperature,
            self.config.llm.generation_deadline(),
        );

        let summarizer: Arc<dyn Summarizer> = if self.config.summarizer.enabled {
            Arc::new(LlmSummarizer::new(model, &self.config.summarizer))
        } else {
            Arc::new(StaticSummarizer)
        };

        Ok(Orchestrator::new(
            retriever,
            reranker,
            generator,
            Arc::new(self.validator()?),
            self.database.clone(),
            summarizer,
            self.config.orchestrator.max_attempts,
        ))
    }
}
