//! Attaches embeddings to stored nodes.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::{EmbeddingConfig, ImportConfig};
use crate::error::AppError;
use crate::loader::Loader;
use crate::models::{NodeKey, NodeLabel, NodeUpsert, OntologyNode, Warning};
use crate::store::{GraphStore, NodeQuery};

use super::{EmbedError, EmbeddingProvider};

/// Bounded exponential backoff: `base_delay * 2^(attempt-1)` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Embeds `text`, retrying every failure. Returns the last error and the
/// number of attempts when all attempts fail.
pub(crate) async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: RetryPolicy,
) -> Result<Vec<f32>, (EmbedError, u32)> {
    let mut attempt = 1;
    loop {
        match provider.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) if attempt >= policy.max_attempts => return Err((e, attempt)),
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::debug!(attempt, ?delay, "Embedding request failed: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Result of one attach run.
#[derive(Debug, Default)]
pub struct AttachOutcome {
    pub embedded: usize,
    pub warnings: Vec<Warning>,
}

/// Embeds node labels and writes the vectors back.
///
/// A node whose retries run out is left without a vector and reported as a
/// warning; the run goes on. Store failures are fatal.
pub struct EmbeddingAttacher<'a> {
    store: &'a dyn GraphStore,
    provider: &'a dyn EmbeddingProvider,
    retry: RetryPolicy,
    concurrency: usize,
    batch_size: usize,
}

impl<'a> EmbeddingAttacher<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        provider: &'a dyn EmbeddingProvider,
        embedding: &EmbeddingConfig,
        import: &ImportConfig,
    ) -> Self {
        Self {
            store,
            provider,
            retry: RetryPolicy::from_config(embedding),
            concurrency: embedding.concurrency.max(1),
            batch_size: import.batch_size.max(1),
        }
    }

    /// Embeds nodes of `labels` lacking a vector, or all of them with `force`.
    pub async fn attach(&self, labels: &[NodeLabel], force: bool) -> Result<AttachOutcome, AppError> {
        let mut outcome = AttachOutcome::default();
        let loader = Loader::new(self.store, self.batch_size);

        for label in labels {
            let mut query = NodeQuery::all(*label);
            if !force {
                query = query.missing_embedding();
            }
            let nodes: Vec<OntologyNode> = self
                .store
                .fetch_nodes(&query)
                .await?
                .into_iter()
                .filter(|node| !node.label.trim().is_empty())
                .collect();
            tracing::info!(%label, nodes = nodes.len(), force, "Embedding labels");

            for chunk in nodes.chunks(self.batch_size) {
                let results: Vec<(NodeKey, Result<Vec<f32>, (EmbedError, u32)>)> =
                    stream::iter(chunk)
                        .map(|node| async move {
                            let result =
                                embed_with_retry(self.provider, &node.label, self.retry).await;
                            (node.key.clone(), result)
                        })
                        .buffered(self.concurrency)
                        .collect()
                        .await;

                let mut upserts = Vec::with_capacity(results.len());
                for (key, result) in results {
                    match result {
                        Ok(vector) => {
                            upserts.push(NodeUpsert::new(key.label, key.id).with("embedding", vector))
                        }
                        Err((e, attempts)) => {
                            let warning = Warning::EmbeddingFailed {
                                node: key.to_string(),
                                attempts,
                                message: e.to_string(),
                            };
                            tracing::warn!("{}", warning);
                            outcome.warnings.push(warning);
                        }
                    }
                }

                let stats = loader.load_nodes(&format!("embed:{}", label), &upserts).await?;
                outcome.embedded += stats.nodes;
            }
        }

        Ok(outcome)
    }
}
