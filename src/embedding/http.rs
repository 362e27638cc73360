//! Client for the embedding HTTP service.
//!
//! `POST {uri}/embed` with `{"input": "<text>"}`, answered by
//! `{"data": [[f32, ...]]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::AppError;

use super::{EmbedError, EmbeddingProvider};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::InvalidConfig(format!("embedding client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embed", config.uri.trim_end_matches('/')),
            dimensions: config.dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { input: text })
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(request_error)?;
        parse_response(&body, self.dimensions)
    }
}

fn request_error(e: reqwest::Error) -> EmbedError {
    if e.is_timeout() {
        EmbedError::Timeout
    } else {
        EmbedError::Request(e.to_string())
    }
}

fn parse_response(body: &[u8], dimensions: usize) -> Result<Vec<f32>, EmbedError> {
    let response: EmbedResponse =
        serde_json::from_slice(body).map_err(|e| EmbedError::Malformed(e.to_string()))?;
    let vector = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::Malformed("empty data".to_string()))?;

    if vector.len() != dimensions {
        return Err(EmbedError::Malformed(format!(
            "expected {} dimensions, got {}",
            dimensions,
            vector.len()
        )));
    }
    Ok(vector)
}
