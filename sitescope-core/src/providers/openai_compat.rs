//! OpenAI-compatible completion service.
//!
//! Supports Azure OpenAI deployments and any endpoint that follows the
//! OpenAI chat completions API format. The two differ only in URL layout
//! and authentication header.

use crate::completion::CompletionService;
use crate::config::LlmConfig;
use crate::error::{ConfigError, ServiceError};
use crate::types::{Message, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// How requests authenticate against the endpoint.
#[derive(Debug, Clone, PartialEq)]
enum Auth {
    /// Azure: `api-key: <key>`.
    AzureKey(String),
    /// OpenAI: `Authorization: Bearer <key>`.
    Bearer(String),
}

/// Completion service speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatibleService {
    client: Client,
    url: String,
    auth: Auth,
    provider: String,
    model: String,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl OpenAiCompatibleService {
    /// Create a new service from configuration, resolving the API key.
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new service with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, ConfigError> {
        let endpoint = config
            .effective_endpoint()
            .ok_or_else(|| ConfigError::MissingField {
                field: "llm.endpoint".to_string(),
            })?;

        let (url, auth) = if config.provider == "azure" {
            (
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint, config.model, config.api_version
                ),
                Auth::AzureKey(api_key),
            )
        } else {
            (
                format!("{}/chat/completions", endpoint),
                Auth::Bearer(api_key),
            )
        };

        Ok(Self {
            client: Client::new(),
            url,
            auth,
            provider: config.provider.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Convert context plus the new prompt to OpenAI JSON messages.
    fn messages_to_json(prompt: &str, context: &[Message]) -> Vec<Value> {
        context
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({"role": role, "content": msg.content})
            })
            .chain(std::iter::once(json!({"role": "user", "content": prompt})))
            .collect()
    }

    /// Extract the generated text from an OpenAI-format response body.
    fn parse_response(body: &Value) -> Result<String, ServiceError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| ServiceError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let finish_reason = choice.get("finish_reason").and_then(|f| f.as_str());
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty());

        match (content, finish_reason) {
            (Some(text), _) => Ok(text.to_string()),
            (None, Some("content_filter")) => Err(ServiceError::ResponseParse {
                message: "Completion withheld by content filter".to_string(),
            }),
            (None, _) => Err(ServiceError::ResponseParse {
                message: "Empty completion content".to_string(),
            }),
        }
    }

    /// Map an HTTP status code to the appropriate `ServiceError`.
    fn map_http_error(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        body: &str,
    ) -> ServiceError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                ServiceError::AuthFailed {
                    provider: self.provider.clone(),
                }
            }
            429 => {
                // "Rate limit ... try again in Xs" or "retry after X seconds"
                let from_body = || {
                    serde_json::from_str::<Value>(body)
                        .ok()
                        .and_then(|v| {
                            v.get("error")?
                                .get("message")?
                                .as_str()
                                .map(|s| s.to_string())
                        })
                        .and_then(|msg| {
                            msg.split_whitespace()
                                .map(|w| w.trim_end_matches(['s', '.']))
                                .find_map(|w| w.parse::<u64>().ok())
                        })
                };
                ServiceError::RateLimited {
                    retry_after_secs: retry_after.or_else(from_body).unwrap_or(5),
                }
            }
            408 | 504 => ServiceError::Timeout { timeout_secs: 0 },
            502 | 503 => ServiceError::Connection {
                message: format!("Service unavailable ({}): {}", status, body),
            },
            status if status >= 500 => ServiceError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => ServiceError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout { timeout_secs: 0 }
        } else if err.is_connect() {
            ServiceError::Connection {
                message: err.to_string(),
            }
        } else {
            ServiceError::ApiRequest {
                message: format!("Request failed: {}", err),
            }
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleService {
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::messages_to_json(prompt, context),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(provider = %self.provider, model = %self.model, "Sending chat completion request");

        let request = self.client.post(&self.url).json(&body);
        let request = match &self.auth {
            Auth::AzureKey(key) => request.header("api-key", key),
            Auth::Bearer(key) => request.header("Authorization", format!("Bearer {}", key)),
        };

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let response_body = response.text().await.map_err(|e| ServiceError::Connection {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(self.map_http_error(status, retry_after, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| ServiceError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
