//! SQL generation prompt template

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Failed to read prompt template {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Prompt template is missing placeholder {0}")]
    MissingPlaceholder(&'static str),
}

const SCHEMA_INFO: &str = "{schema_info}";
const USER_QUESTION: &str = "{user_question}";
const FORMAT_INSTRUCTIONS: &str = "{format_instructions}";

const DEFAULT_TEMPLATE: &str = "\
You are an expert SQL analyst. Write one read-only SQL query that answers the
user's question using only the tables and columns listed below.

{schema_info}

Rules:
- Use only table and column names that appear in the schema above.
- Respect the data type annotation of each column when comparing or casting.
- Write a single SELECT statement. Never modify data.
- Qualify columns with a table alias whenever more than one table is joined.
- If the question cannot be answered from this schema, say so in the analysis
  and set confidence below 0.3.

Question:
{user_question}

{format_instructions}
";

pub(crate) const FORMAT_INSTRUCTIONS_TEXT: &str = "\
Respond with a single JSON object and nothing else:
{
  \"sql\": \"the complete executable SQL query\",
  \"analysis\": \"which data the query reads and how\",
  \"explanation\": \"a short non-technical explanation for the user\",
  \"confidence\": 0.0
}
confidence is a number between 0.0 and 1.0.";

/// Prompt template with `{schema_info}`, `{user_question}` and
/// `{format_instructions}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        for placeholder in [SCHEMA_INFO, USER_QUESTION] {
            if !template.contains(placeholder) {
                return Err(PromptError::MissingPlaceholder(placeholder));
            }
        }
        Ok(Self { template })
    }

    pub fn from_file(path: &Path) -> Result<Self, PromptError> {
        let template = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(template)
    }

    /// Load from `path` when given, otherwise the built-in template
    pub fn load(path: Option<&Path>) -> Result<Self, PromptError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Fill the template. Feedback from a previous attempt is appended to the
    /// question, never substituted for it.
    pub fn render(&self, question: &str, schema_info: &str, feedback: Option<&str>) -> String {
        let question = match feedback.map(str::trim).filter(|f| !f.is_empty()) {
            Some(feedback) => format!("{}\n\n{}", question, feedback),
            None => question.to_string(),
        };

        let rendered = self
            .template
            .replace(SCHEMA_INFO, schema_info)
            .replace(FORMAT_INSTRUCTIONS, FORMAT_INSTRUCTIONS_TEXT);

        // Last, so braces inside the question are never treated as placeholders
        rendered.replace(USER_QUESTION, &question)
    }
}
