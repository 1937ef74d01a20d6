//! Natural-language summaries of query results

use crate::config::SummarizerConfig;
use crate::database::QueryRows;
use crate::generation::{CompletionRequest, LanguageModel, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub text: String,
    pub usage: TokenUsage,
}

/// Turns a result set into prose for the user. Never fails.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, question: &str, sql: &str, rows: &QueryRows) -> Summary;
}

fn row_count_summary(rows: &QueryRows) -> String {
    format!("Query completed: {} rows returned.", rows.row_count())
}

/// Row count only; used when summarization is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSummarizer;

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, _question: &str, _sql: &str, rows: &QueryRows) -> Summary {
        Summary {
            text: row_count_summary(rows),
            usage: TokenUsage::default(),
        }
    }
}

pub struct LlmSummarizer {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
    sample_rows: usize,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: &SummarizerConfig) -> Self {
        Self {
            model,
            temperature: config.temperature,
            sample_rows: config.sample_rows,
        }
    }

    fn prompt(&self, question: &str, sql: &str, rows: &QueryRows) -> String {
        let sample: Vec<serde_json::Value> = rows
            .rows
            .iter()
            .take(self.sample_rows)
            .map(|row| {
                let object: serde_json::Map<String, serde_json::Value> = rows
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect();

        format!(
            "Summarize this SQL query result so the user can understand it easily.\n\n\
             Question: {question}\n\n\
             Executed SQL:\n{sql}\n\n\
             Result ({total} rows, up to {shown} shown):\n{sample}\n\n\
             Include:\n\
             1. The number of rows returned\n\
             2. The key findings in 3-5 sentences\n\
             3. Answer in the language of the question",
            question = question,
            sql = sql,
            total = rows.row_count(),
            shown = self.sample_rows,
            sample = serde_json::Value::Array(sample),
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, question: &str, sql: &str, rows: &QueryRows) -> Summary {
        let request = CompletionRequest::text(self.prompt(question, sql, rows), self.temperature)
            .with_max_tokens(500);

        match self.model.complete(&request).await {
            Ok(completion) if !completion.text.trim().is_empty() => Summary {
                text: completion.text.trim().to_string(),
                usage: completion.usage,
            },
            Ok(_) => {
                tracing::warn!("Summarizer returned empty text");
                Summary {
                    text: row_count_summary(rows),
                    usage: TokenUsage::default(),
                }
            }
            Err(e) => {
                tracing::warn!("Result summarization failed: {}", e);
                Summary {
                    text: row_count_summary(rows),
                    usage: TokenUsage::default(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{Completion, LlmError};
    use serde_json::json;

    struct FixedModel(Result<&'static str, ()>);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            assert!(!request.json_output);
            match self.0 {
                Ok(text) => Ok(Completion {
                    text: text.to_string(),
                    usage: TokenUsage {
                        prompt_tokens: 50,
                        completion_tokens: 10,
                    },
                }),
                Err(()) => Err(LlmError::Network("connection refused".to_string())),
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn rows() -> QueryRows {
        QueryRows {
            columns: vec!["NAME".to_string()],
            rows: vec![vec![json!("Kim")], vec![json!("Lee")]],
            truncated: false,
        }
    }

    fn config() -> SummarizerConfig {
        SummarizerConfig {
            enabled: true,
            temperature: 0.3,
            sample_rows: 1,
        }
    }

    #[tokio::test]
    async fn test_static_summary() {
        let summary = StaticSummarizer.summarize("q", "SELECT 1", &rows()).await;
        assert_eq!(summary.text, "Query completed: 2 rows returned.");
    }

    #[tokio::test]
    async fn test_llm_summary() {
        let summarizer = LlmSummarizer::new(Arc::new(FixedModel(Ok(" Two tenants. "))), &config());
        let summary = summarizer.summarize("q", "SELECT NAME FROM T", &rows()).await;
        assert_eq!(summary.text, "Two tenants.");
        assert_eq!(summary.usage.completion_tokens, 10);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let summarizer = LlmSummarizer::new(Arc::new(FixedModel(Err(()))), &config());
        let summary = summarizer.summarize("q", "SELECT NAME FROM T", &rows()).await;
        assert_eq!(summary.text, "Query completed: 2 rows returned.");
    }

    #[test]
    fn test_prompt_samples_rows() {
        let summarizer = LlmSummarizer::new(Arc::new(FixedModel(Ok(""))), &config());
        let prompt = summarizer.prompt("who rents?", "SELECT NAME FROM T", &rows());
        assert!(prompt.contains("2 rows, up to 1 shown"));
        assert!(prompt.contains(r#"[{"NAME":"Kim"}]"#));
        assert!(!prompt.contains("Lee"));
    }
}
