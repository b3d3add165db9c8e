//! OpenAI-compatible provider.
//!
//! Calls `/chat/completions` first. If that fails for any reason it retries
//! once against the legacy `/completions` endpoint with the messages
//! flattened into a single prompt, and reports both errors when both fail.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
#[cfg(feature = "openai")]
use tracing::{debug, warn};

use super::{
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, Endpoint, LlmProvider, ProviderError,
    TokenUsage,
};

/// Environment variable name for the API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    #[cfg(feature = "openai")]
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::from_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "OpenAI API key",
        ))
    }

    pub fn from_credential(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            #[cfg(feature = "openai")]
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg_attr(not(feature = "openai"), allow(dead_code))]
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[cfg_attr(not(feature = "openai"), allow(dead_code))]
#[derive(Debug, Serialize)]
struct LegacyRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f32,
    max_tokens: u32,
}

/// Text of the first choice, from either `message.content` (chat shape) or
/// `text` (legacy shape).
pub fn extract_choice_text(body: &JsonValue) -> Option<String> {
    let choice = body.get("choices")?.get(0)?;
    choice
        .pointer("/message/content")
        .and_then(JsonValue::as_str)
        .or_else(|| choice.get("text").and_then(JsonValue::as_str))
        .map(str::to_string)
}

#[cfg_attr(not(feature = "openai"), allow(dead_code))]
/// Messages flattened for the legacy prompt endpoint.
fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg_attr(not(feature = "openai"), allow(dead_code))]
fn parse_completion(body: JsonValue, endpoint: Endpoint) -> Result<CompletionResponse, ProviderError> {
    let content = extract_choice_text(&body)
        .ok_or_else(|| ProviderError::ParseError("response has no choices[0] text".to_string()))?;
    let usage = body
        .get("usage")
        .cloned()
        .and_then(|u| serde_json::from_value::<TokenUsage>(u).ok())
        .unwrap_or_default();
    let model = body
        .get("model")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(CompletionResponse {
        content,
        usage,
        model,
        endpoint,
    })
}

#[cfg(feature = "openai")]
impl OpenAiProvider {
    async fn post(
        &self,
        path: &str,
        body: &impl Serialize,
        config: &CompletionConfig,
    ) -> Result<JsonValue, ProviderError> {
        // Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == 401 {
            return Err(ProviderError::AuthError);
        }
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let body = self.post("chat/completions", &request, config).await?;
        parse_completion(body, Endpoint::Chat)
    }

    async fn legacy(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = LegacyRequest {
            model: &config.model,
            prompt: flatten_messages(messages),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let body = self.post("completions", &request, config).await?;
        parse_completion(body, Endpoint::LegacyCompletion)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[cfg(feature = "openai")]
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let modern = match self.chat(&messages, config).await {
            Ok(response) => {
                debug!(model = %response.model, tokens = response.usage.total(), "chat completion");
                return Ok(response);
            }
            Err(e) => e,
        };
        warn!(error = %modern, "chat endpoint failed, trying legacy completion endpoint");
        self.legacy(&messages, config)
            .await
            .map_err(|legacy| ProviderError::BothEndpointsFailed {
                modern: Box::new(modern),
                legacy: Box::new(legacy),
            })
    }

    #[cfg(not(feature = "openai"))]
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            "OpenAI provider requires the 'openai' feature".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_choice_text_from_chat_shape() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "result = 1"}}]});
        assert_eq!(extract_choice_text(&body).as_deref(), Some("result = 1"));
    }

    #[test]
    fn test_choice_text_from_legacy_shape() {
        let body = json!({"choices": [{"text": "len(df)"}]});
        assert_eq!(extract_choice_text(&body).as_deref(), Some("len(df)"));
        assert!(extract_choice_text(&json!({"choices": []})).is_none());
    }

    #[test]
    fn test_parse_completion_reads_usage() {
        let body = json!({
            "model": "gpt-4o-mini",
            "choices": [{"text": "x"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        });
        let response = parse_completion(body, Endpoint::LegacyCompletion).unwrap();
        assert_eq!(response.usage.total(), 12);
        assert_eq!(response.model, "gpt-4o-mini");
        assert!(matches!(
            parse_completion(json!({}), Endpoint::Chat),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_flatten_messages() {
        let messages = vec![ChatMessage::system(" be brief "), ChatMessage::user("question")];
        assert_eq!(flatten_messages(&messages), "be brief\n\nquestion");
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-proj-super-secret-12345";
        let provider = OpenAiProvider::new(secret_key).with_base_url("http://localhost:8080/v1/");
        let debug_output = format!("{:?}", provider);
        assert!(!debug_output.contains(secret_key), "API key was exposed in Debug output!");
        assert!(debug_output.contains("[REDACTED]"));
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_health_check_requires_key() {
        assert!(OpenAiProvider::new("key").health_check().await);
        assert!(!OpenAiProvider::new("").health_check().await);
    }
}
