//! Chat-completion language model client
//!
//! Speaks the OpenAI chat-completions wire format, which OpenAI, Groq and
//! Ollama's compatibility endpoint all accept. Transient failures (HTTP 429,
//! 5xx, network errors) are retried with exponential backoff; any other
//! client error fails immediately.

use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key not set: environment variable {0} is empty or missing")]
    MissingApiKey(String),

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("LLM returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("LLM request failed: {0}")]
    Network(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    /// Ask the provider to constrain output to a single JSON object
    pub json_output: bool,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Free-text completion
    pub fn text(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature,
            json_output: false,
            max_tokens: None,
        }
    }

    /// Completion constrained to a JSON object
    pub fn json(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            json_output: true,
            ..Self::text(prompt, temperature)
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Prompt in, completion text out
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    fn model_name(&self) -> &str;
}

/// Known providers and their chat-completions endpoints
const PROVIDERS: [(&str, &str); 3] = [
    ("openai", "https://api.openai.com/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("ollama", "http://localhost:11434/v1"),
];

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiCompatibleModel {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => PROVIDERS
                .iter()
                .find(|(name, _)| *name == config.provider)
                .map(|(_, url)| url.to_string())
                .ok_or_else(|| LlmError::UnknownProvider(config.provider.clone()))?,
        };

        // Local Ollama runs without a key
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() && config.provider != "ollama" {
            return Err(LlmError::MissingApiKey(config.api_key_env.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if request.json_output {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn parse_response(response: ChatResponse) -> Result<Completion, LlmError> {
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }
}

/// Backoff before retry `attempt` (1-based): 1s, 2s, 4s, ... capped at 32s
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = self.body(request);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_delay(attempt);
                tracing::debug!("Retrying LLM call in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            let mut builder = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response
                            .json()
                            .await
                            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                        return Self::parse_response(parsed);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = LlmError::Http {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!("{}", err);
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(LlmError::Timeout(self.timeout_secs));
                }
                Err(e) => {
                    last_err = Some(LlmError::Network(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Network("LLM call failed after retries".into())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, key_env: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            base_url: None,
            api_key_env: key_env.to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            timeout_secs: 5,
            max_retries: 0,
            prompt_file: None,
        }
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        let delays: Vec<u64> = (1..=7).map(|a| retry_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 32]);
    }

    #[test]
    fn test_missing_api_key() {
        let result =
            OpenAiCompatibleModel::from_config(&config("openai", "SQLRAG_TEST_UNSET_KEY_1"));
        assert!(matches!(result, Err(LlmError::MissingApiKey(_))));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let model =
            OpenAiCompatibleModel::from_config(&config("ollama", "SQLRAG_TEST_UNSET_KEY_2"))
                .unwrap();
        assert_eq!(model.endpoint, "http://localhost:11434/v1/chat/completions");
        assert_eq!(model.model_name(), "test-model");
    }

    #[test]
    fn test_unknown_provider() {
        let result =
            OpenAiCompatibleModel::from_config(&config("mystery", "SQLRAG_TEST_UNSET_KEY_3"));
        assert!(matches!(result, Err(LlmError::UnknownProvider(_))));
    }

    #[test]
    fn test_request_body() {
        let mut cfg = config("ollama", "SQLRAG_TEST_UNSET_KEY_4");
        cfg.base_url = Some("http://llm.internal/v1/".to_string());
        let model = OpenAiCompatibleModel::from_config(&cfg).unwrap();
        assert_eq!(model.endpoint, "http://llm.internal/v1/chat/completions");

        let request = CompletionRequest::json("hello", 0.0).with_system("be brief");
        let body = model.body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("max_tokens").is_none());

        let body = model.body(&CompletionRequest::text("hi", 0.3).with_max_tokens(500));
        assert!(body.get("response_format").is_none());
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn test_parse_response_with_usage() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"sql\": \"SELECT 1\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }))
        .unwrap();

        let completion = OpenAiCompatibleModel::parse_response(response).unwrap();
        assert_eq!(completion.text, "{\"sql\": \"SELECT 1\"}");
        assert_eq!(completion.usage.prompt_tokens, 120);
        assert_eq!(completion.usage.completion_tokens, 30);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            OpenAiCompatibleModel::parse_response(response),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
