//! Remote service clients
//!
//! Two OpenAI-compatible endpoints are used: `/embeddings` and
//! `/chat/completions`. Pipeline stages depend only on the
//! [`EmbeddingService`] and [`ChatService`] traits so tests can substitute
//! in-process fakes.

pub mod api_log;
pub mod chat_client;
pub mod embedding_client;

pub use api_log::ApiLogger;
pub use chat_client::ChatClient;
pub use embedding_client::EmbeddingClient;

use crate::utils::Retryable;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("dirtax/", env!("CARGO_PKG_VERSION"));

/// Remote call errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Completion text did not contain the requested JSON object
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Network(_) | ServiceError::Timeout(_) | ServiceError::Parse(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ServiceError::Decode(_) => false,
        }
    }
}

impl Retryable for ServiceError {
    fn is_retryable(&self) -> bool {
        ServiceError::is_retryable(self)
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

/// Produces one vector per input text, in input order.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Hard per-request item limit of the remote service
    fn max_batch(&self) -> usize;

    async fn embed(&self, texts: &[String], batch_name: &str) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Returns the raw completion text for one request.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn complete(&self, request: &ChatRequest, log_name: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One completion request; model and temperature are fixed by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub enable_thinking: bool,
}

/// Connection settings shared by both clients
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn build_http_client(settings: &HttpSettings) -> Result<reqwest::Client, ServiceError> {
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", settings.api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|e| ServiceError::Network(format!("invalid API key header: {}", e)))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(settings.timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ServiceError::Network(e.to_string()))
}
