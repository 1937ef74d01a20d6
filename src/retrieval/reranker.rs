//! Second-pass relevance reranking
//!
//! A [`Reranker`] scores candidates with one [`RelevanceScorer`] strategy,
//! then min-max normalizes both the scorer output and the upstream hybrid
//! score and blends them. A scorer failure degrades to the first N
//! candidates in hybrid order; it is never fatal.

use crate::config::RerankerConfig;
use crate::generation::{parse_json_object, CompletionRequest, LanguageModel};
use crate::retrieval::{RankedCandidate, RetrievalCandidate};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Unknown rerank strategy: {0}")]
    UnknownStrategy(String),
}

/// Scoring strategy behind the [`Reranker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankStrategy {
    /// Share of query terms present in the candidate text
    LexicalSignal,
    /// Cross-encoder relevance model
    CrossEncoder,
    /// Language model picks the relevant tables
    LlmSelection,
}

impl RerankStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankStrategy::LexicalSignal => "lexical-signal",
            RerankStrategy::CrossEncoder => "cross-encoder",
            RerankStrategy::LlmSelection => "llm-selection",
        }
    }
}

impl FromStr for RerankStrategy {
    type Err = RerankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical-signal" => Ok(RerankStrategy::LexicalSignal),
            "cross-encoder" => Ok(RerankStrategy::CrossEncoder),
            "llm-selection" => Ok(RerankStrategy::LlmSelection),
            other => Err(RerankError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Raw relevance scores, one per candidate and aligned with the input.
/// Scale is free; the reranker normalizes.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<f32>, RerankError>;

    fn name(&self) -> &str;
}

/// Min-max normalize into [0, 1]; a constant set maps to 0.5
pub fn normalize(values: &[f32]) -> Vec<f32> {
    let cleaned: Vec<f32> = values
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();

    let min = cleaned.iter().copied().fold(f32::INFINITY, f32::min);
    let max = cleaned.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if cleaned.is_empty() || max - min <= f32::EPSILON {
        return vec![0.5; cleaned.len()];
    }

    cleaned.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Score fusion and top-N selection
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    top_n: usize,
    hybrid_weight: f32,
    rerank_weight: f32,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, config: &RerankerConfig) -> Self {
        Self {
            scorer,
            top_n: config.top_n,
            hybrid_weight: config.hybrid_weight,
            rerank_weight: config.rerank_weight,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Top-N candidates by blended score, best first
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievalCandidate>,
    ) -> Vec<RankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let scored = tokio::time::timeout(self.timeout, self.scorer.score(query, &candidates)).await;

        let rerank_scores = match scored {
            Ok(Ok(scores)) if scores.len() == candidates.len() => scores,
            Ok(Ok(scores)) => {
                tracing::warn!(
                    "{} returned {} scores for {} candidates; keeping hybrid order",
                    self.scorer.name(),
                    scores.len(),
                    candidates.len()
                );
                return self.fallback(candidates);
            }
            Ok(Err(e)) => {
                tracing::warn!("Rerank failed ({}): {}; keeping hybrid order", self.scorer.name(), e);
                return self.fallback(candidates);
            }
            Err(_) => {
                tracing::warn!(
                    "Rerank timed out after {}s; keeping hybrid order",
                    self.timeout.as_secs()
                );
                return self.fallback(candidates);
            }
        };

        let ranked = self.fuse(candidates, &rerank_scores);
        tracing::info!(
            "Rerank ({}): selected {:?}",
            self.scorer.name(),
            ranked.iter().filter_map(|c| c.table_name()).collect::<Vec<_>>()
        );
        ranked
    }

    /// Blend normalized scores, stable-sort descending, keep top N
    pub fn fuse(
        &self,
        candidates: Vec<RetrievalCandidate>,
        rerank_scores: &[f32],
    ) -> Vec<RankedCandidate> {
        let hybrid: Vec<f32> = candidates.iter().map(|c| c.hybrid_score()).collect();
        let normalized_hybrid = normalize(&hybrid);
        let normalized_rerank = normalize(rerank_scores);

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .zip(normalized_hybrid.into_iter().zip(normalized_rerank))
            .map(|(candidate, (hybrid_score, rerank_score))| RankedCandidate {
                candidate,
                hybrid_score,
                rerank_score,
                final_score: self.hybrid_weight * hybrid_score + self.rerank_weight * rerank_score,
            })
            .collect();

        // `sort_by` is stable: equal scores keep hybrid rank
        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(self.top_n);
        ranked
    }

    /// First N in hybrid order with a neutral rerank score
    fn fallback(&self, mut candidates: Vec<RetrievalCandidate>) -> Vec<RankedCandidate> {
        candidates.truncate(self.top_n);
        let hybrid: Vec<f32> = candidates.iter().map(|c| c.hybrid_score()).collect();
        let normalized_hybrid = normalize(&hybrid);

        candidates
            .into_iter()
            .zip(normalized_hybrid)
            .map(|(candidate, hybrid_score)| RankedCandidate {
                candidate,
                hybrid_score,
                rerank_score: 0.5,
                final_score: self.hybrid_weight * hybrid_score + self.rerank_weight * 0.5,
            })
            .collect()
    }
}

/// Build the scorer named by `config.strategy`
pub fn build_scorer(
    config: &RerankerConfig,
    model: Arc<dyn LanguageModel>,
) -> Result<Arc<dyn RelevanceScorer>, RerankError> {
    let strategy: RerankStrategy = config.strategy.parse()?;
    let scorer: Arc<dyn RelevanceScorer> = match strategy {
        RerankStrategy::LexicalSignal => Arc::new(LexicalSignalScorer),
        RerankStrategy::CrossEncoder => Arc::new(CrossEncoderScorer::new(&config.model)?),
        RerankStrategy::LlmSelection => Arc::new(LlmSelectionScorer::new(model, config.top_n)),
    };
    Ok(scorer)
}

fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of distinct query terms found in the candidate text.
/// Underscored identifiers count as separate words.
pub struct LexicalSignalScorer;

#[async_trait]
impl RelevanceScorer for LexicalSignalScorer {
    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<f32>, RerankError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }

        Ok(candidates
            .iter()
            .map(|candidate| {
                let text = candidate.content.to_lowercase().replace('_', " ");
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                hits as f32 / terms.len() as f32
            })
            .collect())
    }

    fn name(&self) -> &str {
        "lexical-signal"
    }
}

/// Supported cross-encoders: (config name suffix, fastembed model)
const RERANK_MODELS: [(&str, RerankerModel); 3] = [
    ("bge-reranker-base", RerankerModel::BGERerankerBase),
    ("bge-reranker-v2-m3", RerankerModel::BGERerankerV2M3),
    ("jina-reranker-v1-turbo-en", RerankerModel::JINARerankerV1TurboEn),
];

/// Cross-encoder scoring via FastEmbed
pub struct CrossEncoderScorer {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderScorer {
    /// Load a cross-encoder by name, e.g. `BAAI/bge-reranker-base`
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let wanted = model_name
            .rsplit('/')
            .next()
            .unwrap_or(model_name)
            .to_lowercase();

        let reranker_model = RERANK_MODELS
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, model)| model.clone())
            .ok_or_else(|| {
                let supported: Vec<&str> = RERANK_MODELS.iter().map(|(n, _)| *n).collect();
                RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}. Supported: {}",
                    model_name,
                    supported.join(", ")
                ))
            })?;

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(reranker_model).with_show_download_progress(false);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl RelevanceScorer for CrossEncoderScorer {
    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<f32>, RerankError> {
        if query.trim().is_empty() {
            return Err(RerankError::RerankingError(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = self.model.clone();
        let query = query.to_string();
        let documents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        let count = documents.len();

        let results = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = documents.iter().map(|s| s.as_str()).collect();
            model.rerank(query.as_str(), refs, false, None)
        })
        .await
        .map_err(|e| RerankError::RerankingError(e.to_string()))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        // Results come back sorted; put them back in input order
        let mut scores = vec![f32::NEG_INFINITY; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }

        if scores.iter().any(|s| *s == f32::NEG_INFINITY) {
            return Err(RerankError::RerankingError(
                "Cross-encoder skipped some candidates".to_string(),
            ));
        }

        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[derive(Debug, Deserialize)]
struct TableSelection {
    selected_tables: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Language-model table picking.
///
/// The i-th of k selected tables scores `(k - i) / k`; unselected
/// candidates score 0.
pub struct LlmSelectionScorer {
    model: Arc<dyn LanguageModel>,
    max_tables: usize,
}

impl LlmSelectionScorer {
    pub fn new(model: Arc<dyn LanguageModel>, max_tables: usize) -> Self {
        Self { model, max_tables }
    }

    fn prompt(&self, query: &str, candidates: &[RetrievalCandidate]) -> String {
        let mut listing = String::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let preview: String = candidate.content.chars().take(200).collect();
            listing.push_str(&format!(
                "[{}] {}\n{}\n\n",
                i + 1,
                candidate.table_name().unwrap_or("unknown"),
                preview
            ));
        }

        format!(
            "Below are database table schemas retrieved for a question.\n\n\
             Question: \"{query}\"\n\n\
             Retrieved tables:\n{listing}\
             Select the (at most {max}) tables most relevant to writing the SQL \
             that answers the question, most relevant first. Include every table \
             a JOIN would need. Use the exact table names shown.\n\n\
             Respond with a JSON object: \
             {{\"selected_tables\": [\"TABLE\", ...], \"reasoning\": \"...\"}}",
            query = query,
            listing = listing,
            max = self.max_tables
        )
    }
}

#[async_trait]
impl RelevanceScorer for LlmSelectionScorer {
    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<f32>, RerankError> {
        let request = CompletionRequest::json(self.prompt(query, candidates), 0.0);
        let completion = self
            .model
            .complete(&request)
            .await
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let selection: TableSelection = parse_json_object(&completion.text)
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let selected: Vec<String> = selection
            .selected_tables
            .iter()
            .take(self.max_tables)
            .map(|t| t.trim().to_uppercase())
            .collect();

        tracing::debug!(
            "LLM selected tables {:?}: {}",
            selected,
            selection.reasoning
        );

        let k = selected.len() as f32;
        Ok(candidates
            .iter()
            .map(|candidate| {
                let name = candidate.table_name().map(|n| n.to_uppercase());
                selected
                    .iter()
                    .position(|s| Some(s) == name.as_ref())
                    .map(|i| (k - i as f32) / k)
                    .unwrap_or(0.0)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "llm-selection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{Completion, LlmError, TokenUsage};
    use crate::index_store::{DocumentMetadata, SchemaDocument};

    fn candidate(table: &str, text: &str, similarity: Option<f32>) -> RetrievalCandidate {
        RetrievalCandidate::from_document(
            SchemaDocument::new(
                format!("table:{}", table),
                text,
                DocumentMetadata {
                    table_name: Some(table.to_string()),
                    ..Default::default()
                },
            ),
            similarity,
            0.0,
        )
    }

    fn config(top_n: usize) -> RerankerConfig {
        RerankerConfig {
            strategy: "lexical-signal".to_string(),
            model: String::new(),
            top_n,
            hybrid_weight: 0.3,
            rerank_weight: 0.7,
            timeout_secs: 5,
        }
    }

    struct FixedScorer(Result<Vec<f32>, String>);

    #[async_trait]
    impl RelevanceScorer for FixedScorer {
        async fn score(&self, _: &str, _: &[RetrievalCandidate]) -> Result<Vec<f32>, RerankError> {
            self.0.clone().map_err(RerankError::RerankingError)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize(&[0.7, 0.7]), vec![0.5, 0.5]);
        assert!(normalize(&[]).is_empty());
        assert_eq!(normalize(&[f32::NAN, 1.0]), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_blend_and_order() {
        let reranker = Reranker::new(Arc::new(FixedScorer(Ok(vec![-2.0, 5.0, 1.0]))), &config(2));
        let candidates = vec![
            candidate("A", "a", Some(0.9)),
            candidate("B", "b", Some(0.5)),
            candidate("C", "c", Some(0.1)),
        ];

        let ranked = reranker.rerank("q", candidates).await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].table_name(), Some("B"));

        // B: hybrid (0.5-0.1)/0.8 = 0.5, rerank 1.0
        assert!((ranked[0].final_score - (0.3 * 0.5 + 0.7 * 1.0)).abs() < 1e-6);
        for r in &ranked {
            assert!((0.0..=1.0).contains(&r.final_score));
            assert!((0.0..=1.0).contains(&r.hybrid_score));
            assert!((0.0..=1.0).contains(&r.rerank_score));
        }
    }

    #[tokio::test]
    async fn test_ties_keep_hybrid_order() {
        let reranker = Reranker::new(Arc::new(FixedScorer(Ok(vec![1.0, 1.0, 1.0]))), &config(5));
        let candidates = vec![
            candidate("FIRST", "x", None),
            candidate("SECOND", "x", None),
            candidate("THIRD", "x", None),
        ];

        let ranked = reranker.rerank("q", candidates.clone()).await;
        let names: Vec<_> = ranked.iter().filter_map(|r| r.table_name()).collect();
        assert_eq!(names, vec!["FIRST", "SECOND", "THIRD"]);
        assert!(ranked.iter().all(|r| (r.final_score - 0.5).abs() < 1e-6));

        // Idempotent for identical inputs
        let again = reranker.rerank("q", candidates).await;
        let again_names: Vec<_> = again.iter().filter_map(|r| r.table_name()).collect();
        assert_eq!(names, again_names);
    }

    #[tokio::test]
    async fn test_scorer_failure_falls_back_to_hybrid_order() {
        let reranker = Reranker::new(Arc::new(FixedScorer(Err("model missing".into()))), &config(2));
        let candidates = vec![
            candidate("LOW", "x", Some(0.1)),
            candidate("HIGH", "x", Some(0.9)),
            candidate("MID", "x", Some(0.5)),
        ];

        let ranked = reranker.rerank("q", candidates).await;
        let names: Vec<_> = ranked.iter().filter_map(|r| r.table_name()).collect();
        assert_eq!(names, vec!["LOW", "HIGH"]);
    }

    #[tokio::test]
    async fn test_misaligned_scores_fall_back() {
        let reranker = Reranker::new(Arc::new(FixedScorer(Ok(vec![1.0]))), &config(5));
        let ranked = reranker
            .rerank("q", vec![candidate("A", "x", None), candidate("B", "x", None)])
            .await;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].table_name(), Some("A"));
    }

    #[tokio::test]
    async fn test_lexical_signal_scorer() {
        let scorer = LexicalSignalScorer;
        let scores = scorer
            .score(
                "rent payments by tenant",
                &[
                    candidate("RENT_PAYMENTS", "Table: RENT_PAYMENTS\n- TENANT_ID", None),
                    candidate("BUILDINGS", "Table: BUILDINGS\n- ADDRESS", None),
                ],
            )
            .await
            .unwrap();

        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], 0.0);
    }

    struct SelectingModel(&'static str);

    #[async_trait]
    impl LanguageModel for SelectingModel {
        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: self.0.to_string(),
                usage: TokenUsage::default(),
            })
        }

        fn model_name(&self) -> &str {
            "selecting"
        }
    }

    #[tokio::test]
    async fn test_llm_selection_scores_by_order() {
        let scorer = LlmSelectionScorer::new(
            Arc::new(SelectingModel(
                r#"Sure: {"selected_tables": ["units", "TENANTS"], "reasoning": "join"}"#,
            )),
            5,
        );

        let scores = scorer
            .score(
                "tenants per unit",
                &[
                    candidate("TENANTS", "t", None),
                    candidate("BUILDINGS", "b", None),
                    candidate("UNITS", "u", None),
                ],
            )
            .await
            .unwrap();

        assert_eq!(scores, vec![0.5, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_llm_selection_garbage_is_an_error() {
        let scorer = LlmSelectionScorer::new(Arc::new(SelectingModel("no idea")), 5);
        assert!(scorer.score("q", &[candidate("A", "a", None)]).await.is_err());
    }

    #[test]
    fn test_strategy_names() {
        for name in ["lexical-signal", "cross-encoder", "llm-selection"] {
            assert_eq!(name.parse::<RerankStrategy>().unwrap().as_str(), name);
        }
        assert!("gpt".parse::<RerankStrategy>().is_err());
    }

    #[test]
    #[ignore] // Requires model download
    fn test_cross_encoder_creation() {
        assert!(CrossEncoderScorer::new("BAAI/bge-reranker-base").is_ok());
    }

    #[test]
    fn test_unsupported_cross_encoder() {
        assert!(matches!(
            CrossEncoderScorer::new("cross-encoder/ms-marco-MiniLM-L-6-v2"),
            Err(RerankError::InitializationError(_))
        ));
    }
}
