//! Reply generation via an OpenAI-compatible chat completions API
//!
//! One request per command, no conversation memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Produces a reply for a spoken command
#[async_trait]
pub trait ReplySource: Send + Sync {
    /// Complete a prompt
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reply`] if the backend fails
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
}

impl ChatClient {
    /// Create a client from LLM configuration
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config("API key required for reply generation (GROQ_API_KEY)".to_string())
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        }
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Reply(format!("chat API error {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        extract_reply(parsed)
    }
}

#[async_trait]
impl ReplySource for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "requesting reply");

        self.request(prompt).await.map_err(|e| match e {
            Error::Reply(_) => e,
            other => Error::Reply(other.to_string()),
        })
    }
}

fn extract_reply(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::Reply("response contained no message".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            api_key: Some("test-key".to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_missing_key_rejected() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(matches!(ChatClient::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_request_without_system_prompt() {
        let client = ChatClient::new(&config()).unwrap();
        let json = serde_json::to_value(client.build_request("what time is it")).unwrap();

        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "what time is it");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_request_with_system_prompt() {
        let client = ChatClient::new(&LlmConfig {
            system_prompt: Some("Keep it short.".to_string()),
            max_tokens: Some(200),
            ..config()
        })
        .unwrap();
        let json = serde_json::to_value(client.build_request("hi")).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 200);
    }

    #[test]
    fn test_extract_reply() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"It is noon."}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(response).unwrap(), "It is noon.");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_reply(empty), Err(Error::Reply(_))));
    }
}
