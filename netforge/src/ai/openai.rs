use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::ai::provider::{ChatMessage, Translator};
use crate::ai::AIError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, base_url: Option<String>, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Hosted endpoints need a key; local servers accept anonymous calls.
    fn requires_key(&self) -> bool {
        !(self.base_url.contains("localhost") || self.base_url.contains("127.0.0.1"))
    }

    async fn send_request(&self, history: &[ChatMessage]) -> Result<String, AIError> {
        if self.api_key.is_none() && self.requires_key() {
            return Err(AIError::MissingApiKey);
        }

        let request_body = ChatRequest {
            model: &self.model,
            messages: history,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut retry_count = 0;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        loop {
            let mut request = self.client.post(self.endpoint()).json(&request_body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body: ChatResponse = resp
                            .json()
                            .await
                            .map_err(|e| AIError::ParseError(format!("Failed to parse JSON: {}", e)))?;

                        return body
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.message.content)
                            .ok_or_else(|| {
                                AIError::InvalidResponse("Empty choices in response".to_string())
                            });
                    } else if status.as_u16() == 429 {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(delay_ms / 1000);

                        if retry_count < MAX_RETRIES {
                            retry_count += 1;
                            tracing::warn!(
                                "Rate limited. Retrying after {} seconds (attempt {}/{})",
                                retry_after,
                                retry_count,
                                MAX_RETRIES
                            );
                            sleep(Duration::from_secs(retry_after)).await;
                            delay_ms *= 2;
                            continue;
                        }
                        return Err(AIError::RateLimited { retry_after });
                    } else {
                        let message = resp
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(AIError::ApiError {
                            status: status.as_u16(),
                            message,
                        });
                    }
                }
                // timeouts and connection errors surface to the pipeline as is
                Err(e) => return Err(AIError::RequestFailed(e)),
            }
        }
    }
}

#[async_trait]
impl Translator for OpenAiClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn translate(&self, history: &[ChatMessage]) -> Result<String, AIError> {
        tracing::info!("Requesting circuit from {} ({})", self.model, self.base_url);
        self.send_request(history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = OpenAiClient::new(
            None,
            Some("http://localhost:11434/v1/".to_string()),
            "llama3".to_string(),
        );
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert!(!client.requires_key());
    }

    #[test]
    fn test_default_base_url_needs_key() {
        let client = OpenAiClient::new(Some(String::new()), None, "gpt-4o".to_string());
        assert_eq!(client.base_url(), OPENAI_BASE_URL);
        assert!(client.requires_key());
        assert!(client.api_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = OpenAiClient::new(None, None, "gpt-4o".to_string());
        let err = client.translate(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, AIError::MissingApiKey));
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let body = serde_json::to_value(ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.5,
            response_format: ResponseFormat { kind: "json_object" },
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
