//! Model adapter.
//!
//! One chat + image surface over two provider shapes (Anthropic messages,
//! OpenAI-compatible chat completions). Transient failures retry with
//! exponential backoff up to the configured ceiling; swapping providers
//! never changes callers.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{ModelProvider, ModelSettings};
use crate::{Error, Result};

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";
const OPENAI_ENDPOINT: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Provider-agnostic model client.
#[derive(Clone)]
pub struct ModelAdapter {
    client: reqwest::Client,
    provider: ModelProvider,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

impl ModelAdapter {
    /// Build from settings; `None` when no provider is configured.
    pub fn from_settings(settings: &ModelSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        let endpoint = match settings.provider {
            ModelProvider::None => return None,
            ModelProvider::Anthropic => settings
                .endpoint
                .clone()
                .unwrap_or_else(|| ANTHROPIC_ENDPOINT.to_string()),
            ModelProvider::Openai => settings
                .endpoint
                .clone()
                .unwrap_or_else(|| OPENAI_ENDPOINT.to_string()),
        };
        Some(Self {
            client: reqwest::Client::new(),
            provider: settings.provider,
            api_key,
            endpoint,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            max_retries: settings.max_retries,
        })
    }

    /// Send a chat request and return the text content.
    pub async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatResponse> {
        let body = match self.provider {
            ModelProvider::Anthropic => self.anthropic_body(messages, opts, None),
            ModelProvider::Openai => self.openai_body(messages, opts, None),
            ModelProvider::None => return Err(Error::NoModel),
        };
        let value = self.send(body).await?;
        self.parse_response(value)
    }

    /// Analyze a base64 PNG (or a file path to one) with a text prompt.
    pub async fn analyze_image(
        &self,
        image: &str,
        prompt: &str,
        is_file_path: bool,
    ) -> Result<String> {
        let data = if is_file_path {
            let bytes = std::fs::read(image)?;
            base64::engine::general_purpose::STANDARD.encode(bytes)
        } else {
            image.to_string()
        };
        let messages = [ChatMessage {
            role: Role::User,
            content: prompt.to_string(),
        }];
        let body = match self.provider {
            ModelProvider::Anthropic => self.anthropic_body(&messages, &ChatOptions::default(), Some(&data)),
            ModelProvider::Openai => self.openai_body(&messages, &ChatOptions::default(), Some(&data)),
            ModelProvider::None => return Err(Error::NoModel),
        };
        let value = self.send(body).await?;
        Ok(self.parse_response(value)?.content)
    }

    // ---- request building ------------------------------------------------

    fn anthropic_body(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        image: Option<&str>,
    ) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let mut out: Vec<Value> = Vec::new();
        for m in messages.iter().filter(|m| m.role != Role::System) {
            let role = match m.role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            let content = match image {
                Some(data) if m.role == Role::User => json!([
                    {
                        "type": "image",
                        "source": { "type": "base64", "media_type": "image/png", "data": data }
                    },
                    { "type": "text", "text": m.content }
                ]),
                _ => json!(m.content),
            };
            out.push(json!({ "role": role, "content": content }));
        }
        json!({
            "model": self.model,
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "system": system.join("\n"),
            "messages": out,
        })
    }

    fn openai_body(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
        image: Option<&str>,
    ) -> Value {
        let out: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content = match image {
                    Some(data) if m.role == Role::User => json!([
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{data}") }
                        },
                        { "type": "text", "text": m.content }
                    ]),
                    _ => json!(m.content),
                };
                json!({ "role": role, "content": content })
            })
            .collect();
        json!({
            "model": self.model,
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "messages": out,
        })
    }

    // ---- transport -------------------------------------------------------

    async fn send(&self, body: Value) -> Result<Value> {
        let url = match self.provider {
            ModelProvider::Anthropic => format!("{}/v1/messages", self.endpoint),
            ModelProvider::Openai => format!("{}/v1/chat/completions", self.endpoint),
            ModelProvider::None => return Err(Error::NoModel),
        };
        let mut attempt = 0u32;
        loop {
            let request = match self.provider {
                ModelProvider::Anthropic => self
                    .client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
                _ => self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key)),
            };
            match request.json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json().await.map_err(|e| Error::Model(e.to_string()))?);
                    }
                    let retryable = retryable_status(status.as_u16());
                    let text = resp.text().await.unwrap_or_default();
                    if retryable && attempt < self.max_retries {
                        let delay = backoff_delay(attempt);
                        debug!(%status, attempt, delay_ms = delay.as_millis() as u64, "retrying model call");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(if retryable {
                        Error::ModelRetryable(format!("{status}: {text}"))
                    } else {
                        Error::Model(format!("{status}: {text}"))
                    });
                }
                Err(e) => {
                    let retryable = e.is_connect() || e.is_timeout() || e.is_request();
                    if retryable && attempt < self.max_retries {
                        let delay = backoff_delay(attempt);
                        warn!(error = %e, attempt, "model transport error, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(if retryable {
                        Error::ModelRetryable(e.to_string())
                    } else {
                        Error::Model(e.to_string())
                    });
                }
            }
        }
    }

    fn parse_response(&self, value: Value) -> Result<ChatResponse> {
        match self.provider {
            ModelProvider::Anthropic => {
                let content = value["content"]
                    .as_array()
                    .and_then(|blocks| {
                        blocks
                            .iter()
                            .find(|b| b["type"] == "text")
                            .and_then(|b| b["text"].as_str())
                    })
                    .unwrap_or_default()
                    .to_string();
                let usage = value["usage"].as_object().map(|u| Usage {
                    input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                    output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                });
                Ok(ChatResponse { content, usage })
            }
            ModelProvider::Openai => {
                let content = value["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let usage = value["usage"].as_object().map(|u| Usage {
                    input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                    output_tokens: u
                        .get("completion_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                });
                Ok(ChatResponse { content, usage })
            }
            ModelProvider::None => Err(Error::NoModel),
        }
    }
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429 | 500..=599)
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF.as_millis() as u64 * 2u64.saturating_pow(attempt);
    Duration::from_millis(base).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(provider: ModelProvider) -> ModelAdapter {
        ModelAdapter::from_settings(&ModelSettings {
            provider,
            api_key: Some("test-key".into()),
            endpoint: None,
            model: "test-model".into(),
            max_tokens: 1024,
            temperature: 0.1,
            max_retries: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_no_provider_yields_none() {
        assert!(ModelAdapter::from_settings(&ModelSettings::default()).is_none());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(retryable_status(429));
        assert!(retryable_status(500));
        assert!(retryable_status(503));
        assert!(retryable_status(408));
        assert!(!retryable_status(400));
        assert!(!retryable_status(401));
        assert!(!retryable_status(404));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
    }

    #[test]
    fn test_anthropic_body_extracts_system() {
        let a = adapter(ModelProvider::Anthropic);
        let body = a.anthropic_body(
            &[
                ChatMessage {
                    role: Role::System,
                    content: "be brief".into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "hi".into(),
                },
            ],
            &ChatOptions::default(),
            None,
        );
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_openai_body_keeps_system_inline() {
        let a = adapter(ModelProvider::Openai);
        let body = a.openai_body(
            &[
                ChatMessage {
                    role: Role::System,
                    content: "be brief".into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "hi".into(),
                },
            ],
            &ChatOptions::default(),
            None,
        );
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_image_block_shapes() {
        let a = adapter(ModelProvider::Anthropic);
        let body = a.anthropic_body(
            &[ChatMessage {
                role: Role::User,
                content: "what is this".into(),
            }],
            &ChatOptions::default(),
            Some("QUJD"),
        );
        assert_eq!(body["messages"][0]["content"][0]["type"], "image");
        let o = adapter(ModelProvider::Openai);
        let body = o.openai_body(
            &[ChatMessage {
                role: Role::User,
                content: "what is this".into(),
            }],
            &ChatOptions::default(),
            Some("QUJD"),
        );
        assert_eq!(body["messages"][0]["content"][0]["type"], "image_url");
    }

    #[test]
    fn test_parse_anthropic_response() {
        let a = adapter(ModelProvider::Anthropic);
        let parsed = a
            .parse_response(serde_json::json!({
                "content": [{ "type": "text", "text": "hello" }],
                "usage": { "input_tokens": 10, "output_tokens": 5 }
            }))
            .unwrap();
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.usage.unwrap().output_tokens, 5);
    }

    #[test]
    fn test_parse_openai_response() {
        let a = adapter(ModelProvider::Openai);
        let parsed = a
            .parse_response(serde_json::json!({
                "choices": [{ "message": { "content": "hello" } }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
            }))
            .unwrap();
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.usage.unwrap().input_tokens, 10);
    }
}
