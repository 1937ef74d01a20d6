//! Retrieval-augmented generate/validate/execute loop
//!
//! Retrieval and reranking run once per request. Generation then repeats,
//! up to `max_attempts` times, each time with feedback from the previous
//! failure appended to the question:
//!
//! - generation errors feed back the error text;
//! - schema validation failures feed back the validator's feedback;
//! - execution errors feed back the raw database message.
//!
//! A panic inside an attempt is reported as an internal failure and the
//! loop moves on. A safety rejection ends the request immediately. Every
//! path returns an [`OrchestrationOutcome`].

mod response;
mod summarize;

pub use response::{
    AskRequest, AskResponse, Citation, Metrics, Mode, Safety, SourceType, TokenCounts,
    MAX_INPUT_CHARS,
};
pub use summarize::{LlmSummarizer, StaticSummarizer, Summarizer, Summary};

use crate::database::{QueryRows, SqlExecutor};
use crate::generation::{format_schema_context, GenerationAttempt, SqlGenerator, TokenUsage};
use crate::retrieval::{HybridRetriever, RankedCandidate, Reranker, RetrievalError};
use crate::safety::{SafetyGate, SafetyVerdict};
use crate::validation::SchemaValidator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Why a request did not produce a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Index store or embedding failure; never retried
    Retrieval,
    /// Model call or output parse failure on the last attempt
    Generation,
    /// Schema validation still failing on the last attempt
    Validation,
    /// Policy rejection; never retried
    Safety,
    /// Database error on the last attempt
    Execution,
    /// Malformed request, or a panic inside an attempt
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOutcome {
    pub response: AskResponse,
    /// Generation attempts consumed
    pub attempts: usize,
    /// Final attempt; confidence is 0 unless the request succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<GenerationAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Tables whose schema was given to the generator
    pub tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<QueryRows>,
}

impl OrchestrationOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn sql(&self) -> Option<&str> {
        self.attempt.as_ref().map(|a| a.sql.as_str())
    }
}

/// State carried across attempts
struct RetryState {
    feedback: Option<String>,
    last_attempt: Option<GenerationAttempt>,
    last_failure: FailureKind,
    last_error: String,
    usage: TokenUsage,
}

impl RetryState {
    fn new() -> Self {
        Self {
            feedback: None,
            last_attempt: None,
            last_failure: FailureKind::Generation,
            last_error: String::new(),
            usage: TokenUsage::default(),
        }
    }

    fn fail(
        &mut self,
        attempt: GenerationAttempt,
        kind: FailureKind,
        error: String,
        feedback: String,
    ) {
        self.last_attempt = Some(attempt);
        self.last_failure = kind;
        self.last_error = error;
        self.feedback = Some(feedback);
    }
}

/// Per-attempt collaborators, shared with the task that runs each attempt
struct Stages {
    generator: SqlGenerator,
    validator: Arc<SchemaValidator>,
    safety: SafetyGate,
    executor: Arc<dyn SqlExecutor>,
    summarizer: Arc<dyn Summarizer>,
}

/// How one attempt ended
enum Step {
    Failed {
        attempt: GenerationAttempt,
        kind: FailureKind,
        error: String,
        feedback: String,
    },
    Rejected {
        attempt: GenerationAttempt,
        verdict: SafetyVerdict,
    },
    Executed {
        attempt: GenerationAttempt,
        rows: QueryRows,
        summary: Summary,
    },
}

impl Stages {
    /// Generate, validate, gate, execute and summarise once
    async fn run(
        self: Arc<Self>,
        question: Arc<str>,
        schema_text: Arc<str>,
        feedback: Option<String>,
    ) -> Step {
        let attempt = self
            .generator
            .generate(&question, &schema_text, feedback.as_deref())
            .await;

        if let Some(error) = attempt.error.clone() {
            return Step::Failed {
                attempt,
                kind: FailureKind::Generation,
                error: format!("SQL generation failed: {}", error),
                feedback: format!(
                    "The previous attempt failed with an error:\n{}\n\nGenerate the SQL again.",
                    error
                ),
            };
        }

        let validation = self.validator.validate(&attempt.sql);
        if !validation.valid {
            let first: Vec<&str> = validation
                .errors
                .iter()
                .take(2)
                .map(String::as_str)
                .collect();
            tracing::warn!("Validation failed: {}", first.join(", "));
            return Step::Failed {
                attempt,
                kind: FailureKind::Validation,
                error: format!("Validation failed: {}", validation.errors.join(", ")),
                feedback: validation.feedback,
            };
        }

        let verdict = self.safety.check(&attempt.sql);
        if !verdict.allowed {
            return Step::Rejected { attempt, verdict };
        }

        match self.executor.execute(&attempt.sql).await {
            Ok(rows) => {
                let summary = self.summarizer.summarize(&question, &attempt.sql, &rows).await;
                Step::Executed {
                    attempt,
                    rows,
                    summary,
                }
            }
            Err(e) => {
                let raw = e.to_string();
                tracing::warn!("SQL execution failed: {}", truncate(&raw, 200));
                Step::Failed {
                    attempt,
                    kind: FailureKind::Execution,
                    error: format!("SQL execution failed: {}", raw),
                    feedback: format!(
                        "The previous SQL failed when executed:\n{}\n\n\
                         Fix the error and generate the SQL again.",
                        raw
                    ),
                }
            }
        }
    }
}

/// Best-effort text of a panic payload
fn panic_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Orchestrator {
    retriever: Arc<HybridRetriever>,
    reranker: Reranker,
    stages: Arc<Stages>,
    max_attempts: usize,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        reranker: Reranker,
        generator: SqlGenerator,
        validator: Arc<SchemaValidator>,
        executor: Arc<dyn SqlExecutor>,
        summarizer: Arc<dyn Summarizer>,
        max_attempts: usize,
    ) -> Self {
        Self {
            retriever,
            reranker,
            stages: Arc::new(Stages {
                generator,
                validator,
                safety: SafetyGate::new(),
                executor,
                summarizer,
            }),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Retrieve and rerank schema context for a question
    pub async fn search(&self, question: &str) -> Result<Vec<RankedCandidate>, RetrievalError> {
        let candidates = self.retriever.retrieve(question).await?;
        let retrieved = candidates.len();

        // Only per-table documents compete for the generator's context
        let tables: Vec<_> = candidates.into_iter().filter(|c| c.is_table()).collect();
        tracing::info!(
            "Retrieved {} candidates, {} tables",
            retrieved,
            tables.len()
        );

        let ranked = self.reranker.rerank(question, tables).await;
        tracing::info!(
            "Reranked with {}: {:?}",
            self.reranker.scorer_name(),
            ranked.iter().filter_map(|c| c.table_name()).collect::<Vec<_>>()
        );
        Ok(ranked)
    }

    pub async fn ask(&self, request: &AskRequest) -> OrchestrationOutcome {
        let started = Instant::now();

        if let Err(message) = request.validate() {
            tracing::warn!("Rejected request: {}", message);
            return self.failure(
                started,
                FailureKind::Internal,
                &message,
                0,
                None,
                Vec::new(),
                TokenUsage::default(),
            );
        }

        let question = request.question();
        tracing::info!("Orchestrating: {}", truncate(&question, 80));

        let ranked = match self.search(&question).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!("Schema retrieval failed: {}", e);
                let message = format!("Schema retrieval failed: {}", e);
                return self.failure(
                    started,
                    FailureKind::Retrieval,
                    &message,
                    0,
                    None,
                    Vec::new(),
                    TokenUsage::default(),
                );
            }
        };

        let tables: Vec<String> = ranked
            .iter()
            .filter_map(|c| c.table_name())
            .map(str::to_string)
            .collect();
        let schema_text: Arc<str> =
            format_schema_context(&ranked, self.retriever.glossary()).into();
        let question: Arc<str> = question.into();

        let mut state = RetryState::new();

        for n in 1..=self.max_attempts {
            tracing::info!("Generation attempt {}/{}", n, self.max_attempts);
            if let Some(feedback) = &state.feedback {
                tracing::debug!("Feedback: {}", truncate(feedback, 200));
            }

            // A panic inside a collaborator fails this attempt, not the request
            let task = tokio::spawn(self.stages.clone().run(
                question.clone(),
                schema_text.clone(),
                state.feedback.clone(),
            ));

            match task.await {
                Ok(Step::Executed {
                    attempt,
                    rows,
                    summary,
                }) => {
                    state.usage.add(attempt.usage);
                    state.usage.add(summary.usage);
                    return self.success(
                        started,
                        n,
                        attempt,
                        rows,
                        &summary.text,
                        tables,
                        state.usage,
                    );
                }
                Ok(Step::Rejected { attempt, verdict }) => {
                    state.usage.add(attempt.usage);
                    return self.rejected(started, verdict, n, attempt, tables, state.usage);
                }
                Ok(Step::Failed {
                    attempt,
                    kind,
                    error,
                    feedback,
                }) => {
                    tracing::warn!(
                        "Attempt {}/{} failed: {}",
                        n,
                        self.max_attempts,
                        truncate(&error, 200)
                    );
                    state.usage.add(attempt.usage);
                    state.fail(attempt, kind, error, feedback);
                }
                Err(e) => {
                    let message = panic_message(e);
                    tracing::error!("Attempt {}/{} aborted: {}", n, self.max_attempts, message);
                    let error = format!("Internal error: {}", message);
                    let attempt =
                        GenerationAttempt::failed(error.clone(), state.feedback.as_deref());
                    let feedback = "The previous attempt failed with an internal error.\n\n\
                                    Generate the SQL again."
                        .to_string();
                    state.fail(attempt, FailureKind::Internal, error, feedback);
                }
            }
        }

        tracing::error!("Giving up after {} attempts: {}", self.max_attempts, state.last_error);

        // Best effort, unverified: keep the last SQL but never its confidence
        let attempt = state.last_attempt.take().map(|mut attempt| {
            attempt.confidence = 0.0;
            attempt.error.get_or_insert_with(|| state.last_error.clone());
            attempt
        });

        self.failure(
            started,
            state.last_failure,
            &state.last_error,
            self.max_attempts,
            attempt,
            tables,
            state.usage,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn success(
        &self,
        started: Instant,
        attempts: usize,
        attempt: GenerationAttempt,
        rows: QueryRows,
        summary: &str,
        tables: Vec<String>,
        usage: TokenUsage,
    ) -> OrchestrationOutcome {
        let mut response = AskResponse::new(
            Mode::Data,
            render_result(&attempt.sql, &rows, summary),
            Safety {
                allowed: true,
                reason: "SQL executed".to_string(),
            },
        );
        response.citations = tables.iter().map(|t| Citation::table(t)).collect();
        finish_metrics(&mut response, started, usage);

        tracing::info!(
            "Orchestration completed in {:.0}ms after {} attempt(s)",
            response.metrics.latency_ms,
            attempts
        );

        OrchestrationOutcome {
            response,
            attempts,
            attempt: Some(attempt),
            failure: None,
            tables,
            rows: Some(rows),
        }
    }

    fn rejected(
        &self,
        started: Instant,
        verdict: SafetyVerdict,
        attempts: usize,
        mut attempt: GenerationAttempt,
        tables: Vec<String>,
        usage: TokenUsage,
    ) -> OrchestrationOutcome {
        let message = format!("Safety check failed: {}", verdict.reason);
        attempt.confidence = 0.0;
        attempt.error = Some(message.clone());

        let mut response = AskResponse::new(
            Mode::Data,
            format!("The request was rejected:\n\n{}", message),
            Safety {
                allowed: false,
                reason: verdict.reason,
            },
        );
        finish_metrics(&mut response, started, usage);

        OrchestrationOutcome {
            response,
            attempts,
            attempt: Some(attempt),
            failure: Some(FailureKind::Safety),
            tables,
            rows: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failure(
        &self,
        started: Instant,
        kind: FailureKind,
        message: &str,
        attempts: usize,
        attempt: Option<GenerationAttempt>,
        tables: Vec<String>,
        usage: TokenUsage,
    ) -> OrchestrationOutcome {
        let mut response = AskResponse::new(
            Mode::Data,
            format!("An error occurred while processing the request:\n\n{}", message),
            Safety {
                allowed: false,
                reason: format!("Error: {}", message),
            },
        );
        finish_metrics(&mut response, started, usage);

        OrchestrationOutcome {
            response,
            attempts,
            attempt,
            failure: Some(kind),
            tables,
            rows: None,
        }
    }
}

fn finish_metrics(response: &mut AskResponse, started: Instant, usage: TokenUsage) {
    let latency = started.elapsed().as_secs_f64() * 1000.0;
    response.metrics = Metrics {
        latency_ms: (latency * 100.0).round() / 100.0,
        tokens: TokenCounts {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
        },
    };
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn cell(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Executed SQL, row count, every returned row as a markdown table, then the
/// summary
pub fn render_result(sql: &str, rows: &QueryRows, summary: &str) -> String {
    let mut parts = vec![format!(
        "**Executed SQL:**\n```sql\n{}\n```\n\n**Rows:** {}{}",
        sql,
        rows.row_count(),
        if rows.truncated { " (truncated)" } else { "" }
    )];

    if rows.is_empty() {
        parts.push("No rows returned.".to_string());
    } else {
        parts.push(format!("| {} |", rows.columns.join(" | ")));
        parts.push(format!("| {} |", vec!["---"; rows.columns.len()].join(" | ")));
        for row in &rows.rows {
            let cells: Vec<String> = row.iter().map(cell).collect();
            parts.push(format!("| {} |", cells.join(" | ")));
        }
    }

    parts.push(String::new());
    if !summary.trim().is_empty() {
        parts.push("**Result analysis:**".to_string());
        parts.push(summary.to_string());
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_result_table() {
        let rows = QueryRows {
            columns: vec!["ID".to_string(), "NAME".to_string()],
            rows: vec![vec![json!(1), json!("Kim|Lee")], vec![json!(2), json!(null)]],
            truncated: false,
        };
        let text = render_result("SELECT ID, NAME FROM TENANTS", &rows, "Two tenants.");

        assert!(text.starts_with("**Executed SQL:**\n```sql\nSELECT ID, NAME FROM TENANTS\n```"));
        assert!(text.contains("**Rows:** 2\n| ID | NAME |\n| --- | --- |"));
        assert!(text.contains("| 1 | Kim\\|Lee |"));
        assert!(text.contains("| 2 |  |"));
        assert!(text.ends_with("**Result analysis:**\nTwo tenants."));
    }

    #[test]
    fn test_render_empty_result() {
        let rows = QueryRows {
            columns: vec!["ID".to_string()],
            ..Default::default()
        };
        let text = render_result("SELECT ID FROM T", &rows, "");
        assert!(text.contains("**Rows:** 0\nNo rows returned."));
        assert!(!text.contains("Result analysis"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("임대료 조회", 2), "임대...");
    }
}
