use std::sync::Arc;

use crate::config::Config;
use crate::context::{AppEmbedder, AppStore, Context};
use crate::di::FromContext;
use crate::embedding::{EmbedTarget, EmbeddingAttacher};
use crate::models::{RunReport, SourceReport};

/// Attaches label embeddings to disease and phenotype nodes.
#[derive(FromContext, Clone)]
pub struct EmbeddingService {
    store: AppStore,
    config: Arc<Config>,
    embedder: AppEmbedder,
}

impl EmbeddingService {
    /// Embeds the nodes of `target` that have no vector yet, or all of them
    /// with `force`. Nodes whose retries run out are warnings, not errors.
    pub async fn embed(&self, target: EmbedTarget, force: bool) -> RunReport {
        let mut report = RunReport::new();
        let source = SourceReport::new(format!("embed:{:?}", target).to_lowercase(), "embed");

        let attacher = EmbeddingAttacher::new(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.config.embedding,
            &self.config.import,
        );
        match attacher.attach(target.labels(), force).await {
            Ok(outcome) => {
                report.embedded = outcome.embedded;
                // already logged by the attacher
                report.warnings.extend(outcome.warnings);
                tracing::info!(embedded = outcome.embedded, "Embedding run finished");
                report.add_source(source);
            }
            Err(e) => report.fail(source, &e),
        }
        report
    }
}
