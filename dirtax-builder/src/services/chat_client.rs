//! Chat completion API client

use super::{build_http_client, ApiLogger, ChatMessage, ChatRequest, ChatService, HttpSettings, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    enable_thinking: bool,
    response_format: ResponseFormat,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
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

/// Client for `POST {base}/chat/completions` with JSON-object output
pub struct ChatClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    logger: Option<ApiLogger>,
}

impl ChatClient {
    pub fn new(settings: &HttpSettings, model: String, logger: Option<ApiLogger>) -> Result<Self, ServiceError> {
        Ok(Self {
            http_client: build_http_client(settings)?,
            endpoint: settings.endpoint("chat/completions"),
            model,
            logger,
        })
    }
}

#[async_trait]
impl ChatService for ChatClient {
    async fn complete(&self, request: &ChatRequest, log_name: &str) -> Result<String, ServiceError> {
        let body = CompletionBody {
            model: &self.model,
            temperature: 0.0,
            max_tokens: request.max_tokens,
            enable_thinking: request.enable_thinking,
            response_format: ResponseFormat { kind: "json_object" },
            messages: &request.messages,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if let Some(logger) = &self.logger {
            let request_value =
                serde_json::to_value(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
            logger.log("chat", log_name, &request_value, status.as_u16(), &text);
        }

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_completion(&text)
    }
}

/// First choice's message content; blank content is a parse error.
fn parse_completion(text: &str) -> Result<String, ServiceError> {
    let parsed: CompletionResponse = serde_json::from_str(text)
        .map_err(|e| ServiceError::Decode(format!("completion response: {}", e)))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(ServiceError::Parse("completion returned no content".to_string()));
    }
    Ok(content)
}
