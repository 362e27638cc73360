//! Label embeddings from an external model service.
//!
//! [`EmbeddingProvider`] is the service seam; [`HttpEmbedder`] talks to the
//! HTTP service and [`EmbeddingAttacher`] drives retries, concurrency and
//! write-back through the store.

mod attacher;
mod http;

pub use attacher::{AttachOutcome, EmbeddingAttacher, RetryPolicy};
pub use http::HttpEmbedder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::NodeLabel;

/// Failures of a single embedding request. All of them are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("request timed out")]
    Timeout,

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Which nodes an `embed` run covers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EmbedTarget {
    Icd10,
    Hpo,
    #[default]
    All,
}

impl EmbedTarget {
    pub fn labels(self) -> &'static [NodeLabel] {
        match self {
            EmbedTarget::Icd10 => &[NodeLabel::IcdDisease],
            EmbedTarget::Hpo => &[NodeLabel::HpoPhenotype],
            EmbedTarget::All => &NodeLabel::EMBEDDABLE,
        }
    }
}
