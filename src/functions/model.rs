//! # Chat Model
//!
//! Seam between the assistant and the language model behind it, and the
//! OpenAI chat-completions implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::{AssistantError, AssistantResult};

/// Default OpenAI API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Maximum error body bytes kept from a failed response
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Language model used by the assistant
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name, for logs
    fn name(&self) -> &str;

    /// Complete a conversation
    async fn complete(&self, messages: &[ChatMessage]) -> AssistantResult<ChatCompletion>;
}

/// OpenAI client configuration
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Chat completions over the OpenAI REST API
pub struct OpenAiChatModel {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("config", &self.config)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn new(mut config: OpenAiConfig) -> AssistantResult<Self> {
        if config.api_key.is_empty() {
            return Err(AssistantError::Internal("openai api_key must not be empty".into()));
        }
        if !config.base_url.starts_with("https://") && !config.base_url.starts_with("http://") {
            return Err(AssistantError::Internal(format!(
                "base_url must start with http:// or https://, got: {}",
                config.base_url
            )));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AssistantError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> AssistantError {
        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => {
                let end = bytes.len().min(MAX_ERROR_BODY_BYTES);
                String::from_utf8_lossy(&bytes[..end]).to_string()
            }
            Err(_) => String::new(),
        };

        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        AssistantError::Upstream(format!("openai returned {}: {}", status, message))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> AssistantResult<ChatCompletion> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| AssistantError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Upstream(format!("failed to parse response: {}", e)))?;

        body.into_completion()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl CompletionResponse {
    fn into_completion(self) -> AssistantResult<ChatCompletion> {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AssistantError::Upstream("model returned no content".into()))?;

        Ok(ChatCompletion {
            content,
            usage: self.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let model = OpenAiChatModel::new(OpenAiConfig::new("sk-test")).unwrap();
        let messages = vec![ChatMessage::system("coach"), ChatMessage::user("hi")];

        let json = serde_json::to_value(model.request_body(&messages)).unwrap();
        assert_eq!(json["model"], DEFAULT_CHAT_MODEL);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 500);
    }

    #[test]
    fn test_parse_completion() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Drink water."}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }"#,
        )
        .unwrap();

        let completion = body.into_completion().unwrap();
        assert_eq!(completion.content, "Drink water.");
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[test]
    fn test_empty_choices_is_upstream_error() {
        let body: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            body.into_completion(),
            Err(AssistantError::Upstream(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(OpenAiChatModel::new(OpenAiConfig::new("")).is_err());

        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = "ftp://example.com".into();
        assert!(OpenAiChatModel::new(config).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenAiConfig::new("sk-very-secret");
        assert!(!format!("{:?}", config).contains("sk-very-secret"));
    }
}
