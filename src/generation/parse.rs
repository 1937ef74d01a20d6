//! Structured-output parsing for model completions

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("model output contains no JSON object")]
    NoJsonObject,

    #[error("model output is not valid JSON for the expected shape: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Deserialize the JSON object in a completion.
///
/// Models sometimes wrap the object in prose or a code fence even when asked
/// not to, so a failed direct parse falls back to the outermost `{ .. }` span.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{').ok_or(ParseError::NoJsonObject)?;
    let end = trimmed.rfind('}').ok_or(ParseError::NoJsonObject)?;
    if end < start {
        return Err(ParseError::NoJsonObject);
    }

    Ok(serde_json::from_str(&trimmed[start..=end])?)
}
