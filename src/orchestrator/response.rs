//! Request and response records at the ask boundary
//!
//! JSON field names are fixed (camelCase) because the web front end reads
//! them directly.

use serde::{Deserialize, Serialize};

/// Longest accepted question, in characters
pub const MAX_INPUT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    Auto,
    Basic,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub user_input: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hints: Option<Vec<String>>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl AskRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            mode: Mode::Auto,
            context_hints: None,
            top_k: default_top_k(),
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.context_hints = Some(hints);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user_input.trim().is_empty() {
            return Err("userInput must not be empty".to_string());
        }
        let chars = self.user_input.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(format!(
                "userInput is {} characters; the limit is {}",
                chars, MAX_INPUT_CHARS
            ));
        }
        if !(1..=100).contains(&self.top_k) {
            return Err(format!("topK must be between 1 and 100, got {}", self.top_k));
        }
        Ok(())
    }

    /// The question as the pipeline sees it: user input plus any hint block
    pub fn question(&self) -> String {
        let hints: Vec<&str> = self
            .context_hints
            .iter()
            .flatten()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect();

        if hints.is_empty() {
            return self.user_input.trim().to_string();
        }

        let mut question = format!("{}\n\nHints:", self.user_input.trim());
        for hint in hints {
            question.push_str("\n- ");
            question.push_str(hint);
        }
        question
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Faq,
    Term,
    Conf,
    Bq,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source_type: SourceType,
}

impl Citation {
    /// A table whose schema informed the answer
    pub fn table(name: &str) -> Self {
        Self {
            title: name.to_string(),
            url: None,
            source_type: SourceType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Safety {
    pub allowed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(rename = "in")]
    pub input: u64,
    #[serde(rename = "out")]
    pub output: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub latency_ms: f64,
    pub tokens: TokenCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub id: String,
    pub route: Mode,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    pub safety: Safety,
    pub metrics: Metrics,
}

impl AskResponse {
    pub fn new(route: Mode, text: impl Into<String>, safety: Safety) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            route,
            text: text.into(),
            citations: Vec::new(),
            follow_ups: Vec::new(),
            safety,
            metrics: Metrics::default(),
        }
    }
}
