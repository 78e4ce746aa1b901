//! LLM client abstraction and step-output parsing.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected LLM response: {0}")]
    Response(String),
}

/// Text of one completion and the tokens it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: u64,
}

/// A chat-style completion backend.
pub trait LlmClient: Send + Sync {
    fn call(
        &self,
        system_prompt: &str,
        user_message: &str,
        api: &ApiConfig,
    ) -> Result<LlmResponse, LlmError>;
}

/// Rough token estimate: one token per four characters, at least one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// Offline client returning a fixed reply. Token usage is estimated from
/// prompt and reply length so the guard still sees realistic growth.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderClient;

pub const PLACEHOLDER_RESPONSE: &str = "Placeholder response from LLM";

impl LlmClient for PlaceholderClient {
    fn call(
        &self,
        system_prompt: &str,
        user_message: &str,
        _api: &ApiConfig,
    ) -> Result<LlmResponse, LlmError> {
        let tokens_used = estimate_tokens(system_prompt)
            + estimate_tokens(user_message)
            + estimate_tokens(PLACEHOLDER_RESPONSE);
        debug!(tokens_used, "placeholder LLM call");
        Ok(LlmResponse {
            text: PLACEHOLDER_RESPONSE.to_string(),
            tokens_used,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api: &ApiConfig) -> Result<Self, LlmError> {
        let api_key = api
            .api_key()
            .ok_or_else(|| LlmError::MissingApiKey(api.api_key_env.clone()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }
}

impl LlmClient for OpenAiClient {
    fn call(
        &self,
        system_prompt: &str,
        user_message: &str,
        api: &ApiConfig,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", api.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &api.model,
            temperature: api.temperature,
            max_tokens: api.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
        };
        info!(model = %api.model, "calling LLM");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| LlmError::Http(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| LlmError::Response(e.without_url().to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("no choices in completion".into()))?;
        let tokens_used = match parsed.usage {
            Some(usage) => usage.total_tokens,
            None => {
                warn!("completion carried no usage; estimating tokens");
                estimate_tokens(system_prompt) + estimate_tokens(user_message) + estimate_tokens(&text)
            }
        };
        Ok(LlmResponse { text, tokens_used })
    }
}

/// Build the client selected by `api.provider`.
pub fn client_for(api: &ApiConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    match api.provider {
        LlmProvider::Placeholder => Ok(Box::new(PlaceholderClient)),
        LlmProvider::OpenAi => Ok(Box::new(OpenAiClient::new(api)?)),
    }
}

/// Strip a surrounding Markdown code fence (```yaml ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a step's reply as a YAML (or JSON) mapping.
///
/// Anything that doesn't parse, or parses to something other than a mapping,
/// is wrapped as `{ raw_response: <text> }`.
pub fn parse_step_output(text: &str) -> Mapping {
    match serde_yaml::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Mapping(mapping)) => mapping,
        _ => {
            let mut mapping = Mapping::new();
            mapping.insert(
                Value::String("raw_response".into()),
                Value::String(text.to_string()),
            );
            mapping
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(mapping: &Mapping, k: &str) -> Option<Value> {
        mapping.get(Value::String(k.into())).cloned()
    }

    #[test]
    fn mapping_output_is_kept() {
        let out = parse_step_output("regime: late_cycle\nconfidence: 0.6\n");
        assert_eq!(key(&out, "regime"), Some(Value::String("late_cycle".into())));
    }

    #[test]
    fn json_output_is_accepted() {
        let out = parse_step_output(r#"{"scenarios": [{"name": "base", "probability": 0.5}]}"#);
        assert!(key(&out, "scenarios").unwrap().is_sequence());
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let out = parse_step_output("```yaml\nbrief: Quiet week ahead.\n```");
        assert_eq!(key(&out, "brief"), Some(Value::String("Quiet week ahead.".into())));
    }

    #[test]
    fn plain_text_becomes_raw_response() {
        let out = parse_step_output(PLACEHOLDER_RESPONSE);
        assert_eq!(out.len(), 1);
        assert_eq!(
            key(&out, "raw_response"),
            Some(Value::String(PLACEHOLDER_RESPONSE.into()))
        );
    }

    #[test]
    fn unparsable_text_becomes_raw_response() {
        let out = parse_step_output("key: [unclosed");
        assert!(key(&out, "raw_response").is_some());
    }

    #[test]
    fn placeholder_counts_tokens() {
        let resp = PlaceholderClient
            .call(&"s".repeat(400), &"u".repeat(800), &ApiConfig::default())
            .unwrap();
        assert_eq!(resp.text, PLACEHOLDER_RESPONSE);
        assert_eq!(resp.tokens_used, 100 + 200 + estimate_tokens(PLACEHOLDER_RESPONSE));
    }

    #[test]
    fn openai_requires_key() {
        let api = ApiConfig {
            provider: LlmProvider::OpenAi,
            api_key_env: "ECONBRIEF_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ApiConfig::default()
        };
        assert!(matches!(client_for(&api), Err(LlmError::MissingApiKey(_))));
    }
}
