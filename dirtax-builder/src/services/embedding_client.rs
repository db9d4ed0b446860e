//! Embedding API client

use super::{build_http_client, ApiLogger, EmbeddingService, HttpSettings, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Client for `POST {base}/embeddings`
pub struct EmbeddingClient {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    max_batch: usize,
    logger: Option<ApiLogger>,
}

impl EmbeddingClient {
    pub fn new(
        settings: &HttpSettings,
        model: String,
        max_batch: usize,
        logger: Option<ApiLogger>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            http_client: build_http_client(settings)?,
            endpoint: settings.endpoint("embeddings"),
            model,
            max_batch: max_batch.max(1),
            logger,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn embed(&self, texts: &[String], batch_name: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        tracing::debug!(batch = batch_name, items = texts.len(), "Requesting embeddings");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if let Some(logger) = &self.logger {
            let request_value = serde_json::to_value(&request)
                .map_err(|e| ServiceError::Decode(e.to_string()))?;
            logger.log("embedding", batch_name, &request_value, status.as_u16(), &body);
        }

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_embeddings(&body)
    }
}

/// Vectors in request order, regardless of the order the API lists them.
fn parse_embeddings(body: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::Decode(format!("embedding response: {}", e)))?;
    parsed.data.sort_by_key(|entry| entry.index);

    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}
