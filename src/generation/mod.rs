//! SQL generation
//!
//! [`SqlGenerator`] renders the prompt from the question, the ranked schema
//! context and any feedback from the previous attempt, calls the language
//! model at a pinned low temperature and parses the structured answer.
//! Failures never escape: they come back as an attempt carrying the
//! [`FAILED_SQL`] sentinel, zero confidence and the error text.

mod llm;
mod parse;
mod prompt;

pub use llm::{
    retry_delay, Completion, CompletionRequest, LanguageModel, LlmError, OpenAiCompatibleModel,
    TokenUsage,
};
pub use parse::{parse_json_object, ParseError};
pub use prompt::{PromptError, PromptTemplate};

use crate::index_store::SchemaDocument;
use crate::retrieval::RankedCandidate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Placeholder SQL carried by a failed attempt
pub const FAILED_SQL: &str = "-- SQL generation failed";

/// Generation never samples hotter than this
const MAX_TEMPERATURE: f32 = 0.2;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Could not parse model output: {0}")]
    Parse(#[from] ParseError),

    #[error("Model returned confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),

    #[error("Model returned an empty SQL statement")]
    EmptySql,

    #[error("Generation timed out after {0}s")]
    Timeout(u64),
}

/// The model's structured answer
#[derive(Debug, Deserialize)]
struct SqlOutput {
    sql: String,
    analysis: String,
    explanation: String,
    confidence: f32,
}

/// One generate call. Not persisted beyond the request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationAttempt {
    pub sql: String,
    pub analysis: String,
    pub explanation: String,
    pub confidence: f32,
    /// Feedback this attempt was generated with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_in: Option<String>,
    /// Set when generation failed and `sql` is the sentinel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub usage: TokenUsage,
}

impl GenerationAttempt {
    pub fn failed(error: impl Into<String>, feedback_in: Option<&str>) -> Self {
        let error = error.into();
        Self {
            sql: FAILED_SQL.to_string(),
            analysis: format!("Error: {}", error),
            explanation: "The SQL could not be generated. Please check the question and try again."
                .to_string(),
            confidence: 0.0,
            feedback_in: feedback_in.map(str::to_string),
            error: Some(error),
            usage: TokenUsage::default(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Render the ranked candidates as the prompt's schema section, one block per
/// candidate with its text verbatim. The glossary, when indexed, trails as
/// business context.
pub fn format_schema_context(
    ranked: &[RankedCandidate],
    glossary: Option<&SchemaDocument>,
) -> String {
    if ranked.is_empty() {
        return "=== No schema information ===\nNo relevant schema was found.".to_string();
    }

    let mut parts = vec!["=== Relevant schema ===".to_string()];
    for (i, candidate) in ranked.iter().enumerate() {
        parts.push(format!("\n[ Schema {} ]", i + 1));
        parts.push(candidate.content().to_string());
    }

    if let Some(glossary) = glossary {
        parts.push("\n[ Business context ]".to_string());
        parts.push(glossary.text.clone());
    }

    parts.join("\n")
}

pub struct SqlGenerator {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    temperature: f32,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        template: PromptTemplate,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            template,
            temperature: temperature.clamp(0.0, MAX_TEMPERATURE),
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Produce one attempt. Never fails; see [`GenerationAttempt::failed`].
    pub async fn generate(
        &self,
        question: &str,
        schema_text: &str,
        feedback: Option<&str>,
    ) -> GenerationAttempt {
        match self.try_generate(question, schema_text, feedback).await {
            Ok(attempt) => {
                tracing::info!("SQL generated (confidence {:.2})", attempt.confidence);
                attempt
            }
            Err(e) => {
                tracing::warn!("SQL generation failed: {}", e);
                GenerationAttempt::failed(e.to_string(), feedback)
            }
        }
    }

    async fn try_generate(
        &self,
        question: &str,
        schema_text: &str,
        feedback: Option<&str>,
    ) -> Result<GenerationAttempt, GenerationError> {
        let prompt = self.template.render(question, schema_text, feedback);
        let request = CompletionRequest::json(prompt, self.temperature);

        let completion = tokio::time::timeout(self.timeout, self.model.complete(&request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))??;

        let output: SqlOutput = parse_json_object(&completion.text)?;

        if !(0.0..=1.0).contains(&output.confidence) {
            return Err(GenerationError::ConfidenceOutOfRange(output.confidence));
        }
        let sql = output.sql.trim();
        if sql.is_empty() {
            return Err(GenerationError::EmptySql);
        }

        Ok(GenerationAttempt {
            sql: sql.to_string(),
            analysis: output.analysis,
            explanation: output.explanation,
            confidence: output.confidence,
            feedback_in: feedback.map(str::to_string),
            error: None,
            usage: completion.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_store::DocumentMetadata;
    use crate::retrieval::RetrievalCandidate;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned completions and records the prompts it saw
    struct CannedModel {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        prompts: Mutex<Vec<(String, f32)>>,
    }

    impl CannedModel {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.prompt.clone(), request.temperature));
            let reply = self.replies.lock().unwrap().remove(0)?;
            Ok(Completion {
                text: reply,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                },
            })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn generator(model: Arc<CannedModel>) -> SqlGenerator {
        SqlGenerator::new(
            model,
            PromptTemplate::default(),
            0.0,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let model = Arc::new(CannedModel::new(vec![Ok(r#"{
            "sql": " SELECT * FROM TENANTS ",
            "analysis": "reads every tenant",
            "explanation": "Lists all tenants.",
            "confidence": 0.92
        }"#
        .to_string())]));

        let attempt = generator(model.clone())
            .generate("list all tenants", "TENANTS(ID, NAME)", None)
            .await;

        assert!(!attempt.is_failure());
        assert_eq!(attempt.sql, "SELECT * FROM TENANTS");
        assert_eq!(attempt.confidence, 0.92);
        assert_eq!(attempt.usage.prompt_tokens, 100);
        assert!(attempt.feedback_in.is_none());
    }

    #[tokio::test]
    async fn test_feedback_reaches_prompt() {
        let model = Arc::new(CannedModel::new(vec![Ok(
            r#"{"sql": "SELECT NAME FROM TENANTS", "analysis": "",
                "explanation": "", "confidence": 0.8}"#
                .to_string(),
        )]));

        let attempt = generator(model.clone())
            .generate("list tenant names", "TENANTS", Some("column-not-found: NONEXISTENT_COL"))
            .await;

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("list tenant names\n\ncolumn-not-found: NONEXISTENT_COL"));
        assert_eq!(prompts[0].1, 0.0);
        assert_eq!(
            attempt.feedback_in.as_deref(),
            Some("column-not-found: NONEXISTENT_COL")
        );
    }

    #[tokio::test]
    async fn test_temperature_is_pinned_low() {
        let model = Arc::new(CannedModel::new(vec![Ok("not json".to_string())]));
        let generator = SqlGenerator::new(
            model.clone(),
            PromptTemplate::default(),
            0.9,
            Duration::from_secs(5),
        );
        generator.generate("q", "s", None).await;

        assert_eq!(model.prompts.lock().unwrap()[0].1, MAX_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_malformed_output_is_a_failure() {
        let model = Arc::new(CannedModel::new(vec![Ok("I think you want SELECT 1".to_string())]));
        let attempt = generator(model).generate("q", "s", None).await;

        assert!(attempt.is_failure());
        assert_eq!(attempt.sql, FAILED_SQL);
        assert_eq!(attempt.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_missing_field_is_a_failure() {
        let model = Arc::new(CannedModel::new(vec![Ok(
            r#"{"sql": "SELECT 1", "confidence": 0.5}"#.to_string(),
        )]));
        let attempt = generator(model).generate("q", "s", None).await;
        assert_eq!(attempt.sql, FAILED_SQL);
    }

    #[tokio::test]
    async fn test_confidence_out_of_range_is_a_failure() {
        let model = Arc::new(CannedModel::new(vec![Ok(
            r#"{"sql": "SELECT 1", "analysis": "", "explanation": "", "confidence": 7}"#
                .to_string(),
        )]));
        let attempt = generator(model).generate("q", "s", None).await;

        assert!(attempt.is_failure());
        assert!(attempt.error.unwrap().contains("confidence"));
    }

    #[tokio::test]
    async fn test_model_error_is_a_failure() {
        let model = Arc::new(CannedModel::new(vec![Err(LlmError::Http {
            status: 500,
            body: "overloaded".to_string(),
        })]));
        let attempt = generator(model).generate("q", "s", Some("prior")).await;

        assert_eq!(attempt.sql, FAILED_SQL);
        assert!(attempt.error.unwrap().contains("overloaded"));
        assert_eq!(attempt.feedback_in.as_deref(), Some("prior"));
    }

    fn ranked(table: &str, text: &str) -> RankedCandidate {
        let doc = SchemaDocument::new(
            format!("table_{}", table),
            text,
            DocumentMetadata {
                table_name: Some(table.to_string()),
                ..Default::default()
            },
        );
        RankedCandidate {
            candidate: RetrievalCandidate::from_document(doc, Some(0.5), 0.01),
            hybrid_score: 0.5,
            rerank_score: 0.5,
            final_score: 0.5,
        }
    }

    #[test]
    fn test_schema_context_blocks() {
        let context = format_schema_context(
            &[
                ranked("TENANTS", "Table: TENANTS\n- ID (INTEGER)"),
                ranked("UNITS", "Table: UNITS\n- UNIT_ID (INTEGER)"),
            ],
            None,
        );

        assert!(context.starts_with("=== Relevant schema ==="));
        assert!(context.contains("[ Schema 1 ]\nTable: TENANTS\n- ID (INTEGER)"));
        assert!(context.contains("[ Schema 2 ]\nTable: UNITS"));
        assert!(!context.contains("Business context"));
    }

    #[test]
    fn test_schema_context_with_glossary() {
        let glossary =
            SchemaDocument::new("business_glossary", "Rent is paid monthly.", Default::default());
        let context = format_schema_context(&[ranked("TENANTS", "TENANTS")], Some(&glossary));
        assert!(context.ends_with("[ Business context ]\nRent is paid monthly."));
    }

    #[test]
    fn test_empty_schema_context() {
        let context = format_schema_context(&[], None);
        assert!(context.contains("No schema information"));
    }
}
