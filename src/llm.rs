//! LLM integration for daily insights
//!
//! This module handles communication with an OpenAI-compatible
//! chat-completions API. Prompt building and fallbacks live in `insights`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct LlmConfig {
  /// None disables generation; callers fall back to static text
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
}

impl LlmConfig {
  pub fn from_env() -> Self {
    Self {
      api_key: env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty()),
      base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
      model: env::var("INSIGHT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum LlmError {
  #[error("API key not configured")]
  MissingApiKey,

  #[error("Request failed: {0}")]
  Request(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("Parse error: {0}")]
  Parse(String),
}

/// ---------------------------------------------------------------------------
/// Chat Completions API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
  model: String,
  messages: Vec<ChatMessage>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
  role: String,
  #[serde(default)]
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<Choice>,
  #[serde(default)]
  usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
  message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
  #[serde(default)]
  pub prompt_tokens: u32,
  #[serde(default)]
  pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
  error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
  message: String,
}

/// ---------------------------------------------------------------------------
/// Chat Client
/// ---------------------------------------------------------------------------

pub struct LlmClient {
  client: Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl LlmClient {
  pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
    let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;

    Ok(Self {
      client: Client::new(),
      api_key,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      model: config.model.clone(),
    })
  }

  /// Call the model with a system prompt and user message. An empty
  /// completion is returned as an empty string, not an error.
  pub async fn complete(
    &self,
    system_prompt: &str,
    user_message: &str,
    max_tokens: u32,
  ) -> Result<(String, Usage), LlmError> {
    let request = ChatRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessage {
          role: "system".to_string(),
          content: Some(system_prompt.to_string()),
        },
        ChatMessage {
          role: "user".to_string(),
          content: Some(user_message.to_string()),
        },
      ],
      temperature: DEFAULT_TEMPERATURE,
      max_tokens,
    };

    let response = self
      .client
      .post(format!("{}/chat/completions", self.base_url))
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    if !status.is_success() {
      // Try to parse error response
      if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
        return Err(LlmError::Api(error_resp.error.message));
      }
      return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
    }

    let chat_response: ChatResponse =
      serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;

    let text = chat_response
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .unwrap_or_default();

    Ok((text, chat_response.usage))
  }
}

/// Put each `•` bullet on its own line. Models sometimes return all three
/// bullets on one line; text without bullets is only trimmed.
pub fn normalize_bullets(text: &str) -> String {
  let trimmed = text.trim();
  if !trimmed.contains('•') {
    return trimmed.to_string();
  }

  trimmed
    .split('•')
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(|item| format!("• {}", item))
    .collect::<Vec<_>>()
    .join("\n")
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn config_for(server: &mockito::Server) -> LlmConfig {
    LlmConfig {
      api_key: Some("test-key".into()),
      base_url: format!("{}/v1/", server.url()),
      model: DEFAULT_MODEL.into(),
    }
  }

  #[test]
  fn test_missing_api_key() {
    let config = LlmConfig {
      api_key: None,
      base_url: DEFAULT_BASE_URL.into(),
      model: DEFAULT_MODEL.into(),
    };
    assert!(matches!(LlmClient::new(&config), Err(LlmError::MissingApiKey)));
  }

  #[test]
  fn test_normalize_bullets_single_line() {
    let input = "• Sleep is up • HRV dipped after hard days • Steps trending higher";
    assert_eq!(
      normalize_bullets(input),
      "• Sleep is up\n• HRV dipped after hard days\n• Steps trending higher"
    );
  }

  #[test]
  fn test_normalize_bullets_keeps_plain_text() {
    assert_eq!(normalize_bullets("  No bullets here \n"), "No bullets here");
    assert_eq!(normalize_bullets(""), "");
  }

  #[tokio::test]
  async fn test_complete_sends_chat_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/v1/chat/completions")
      .match_header("authorization", "Bearer test-key")
      .match_body(mockito::Matcher::PartialJson(json!({
        "model": "gpt-4o-mini",
        "max_tokens": 200,
        "messages": [
          {"role": "system", "content": "system prompt"},
          {"role": "user", "content": "user message"}
        ]
      })))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        json!({
          "choices": [{"index": 0, "message": {"role": "assistant", "content": "• One\n• Two\n• Three"}}],
          "usage": {"prompt_tokens": 120, "completion_tokens": 18, "total_tokens": 138}
        })
        .to_string(),
      )
      .create_async()
      .await;

    let client = LlmClient::new(&config_for(&server)).unwrap();
    let (text, usage) = client.complete("system prompt", "user message", 200).await.unwrap();

    mock.assert_async().await;
    assert_eq!(text, "• One\n• Two\n• Three");
    assert_eq!(usage.prompt_tokens, 120);
    assert_eq!(usage.completion_tokens, 18);
  }

  #[tokio::test]
  async fn test_complete_empty_choices_is_empty_text() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/v1/chat/completions")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"choices": []}"#)
      .create_async()
      .await;

    let client = LlmClient::new(&config_for(&server)).unwrap();
    let (text, usage) = client.complete("s", "u", 200).await.unwrap();
    assert!(text.is_empty());
    assert_eq!(usage.completion_tokens, 0);
  }

  #[tokio::test]
  async fn test_complete_api_error_message() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/v1/chat/completions")
      .with_status(429)
      .with_header("content-type", "application/json")
      .with_body(r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#)
      .create_async()
      .await;

    let client = LlmClient::new(&config_for(&server)).unwrap();
    let result = client.complete("s", "u", 200).await;
    assert!(matches!(result, Err(LlmError::Api(msg)) if msg == "Rate limit reached"));
  }

  #[tokio::test]
  async fn test_complete_unparseable_body() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/v1/chat/completions")
      .with_status(200)
      .with_body("not json")
      .create_async()
      .await;

    let client = LlmClient::new(&config_for(&server)).unwrap();
    let result = client.complete("s", "u", 200).await;
    assert!(matches!(result, Err(LlmError::Parse(_))));
  }
}
