//! Batched, idempotent writes of one source's nodes and edges.

use crate::error::AppError;
use crate::models::{EdgeUpsert, NodeUpsert};
use crate::store::{Batch, GraphStore};

/// What a [`Loader::load`] call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub nodes: usize,
    pub edges: usize,
    pub batches: usize,
}

/// Splits writes into batches of `batch_size`, each applied in its own
/// transaction. Nodes go first so edge endpoints exist.
///
/// The first failing batch stops the load with [`AppError::Load`]; batches
/// committed before it stay. There is no automatic retry.
pub struct Loader<'a> {
    store: &'a dyn GraphStore,
    batch_size: usize,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn GraphStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn load(
        &self,
        source: &str,
        nodes: &[NodeUpsert],
        edges: &[EdgeUpsert],
    ) -> Result<LoadStats, AppError> {
        let batches = nodes
            .chunks(self.batch_size)
            .map(|chunk| Batch::nodes(chunk.to_vec()))
            .chain(
                edges
                    .chunks(self.batch_size)
                    .map(|chunk| Batch::edges(chunk.to_vec())),
            );

        let mut stats = LoadStats::default();
        for (index, batch) in batches.enumerate() {
            self.store
                .run_batch(&batch)
                .await
                .map_err(|e| AppError::Load {
                    source_name: source.to_string(),
                    batch: index,
                    message: e.to_string(),
                })?;

            stats.nodes += batch.nodes.len();
            stats.edges += batch.edges.len();
            stats.batches += 1;
            tracing::info!(
                source,
                batch = index,
                nodes = stats.nodes,
                edges = stats.edges,
                "Batch committed"
            );
        }

        Ok(stats)
    }

    pub async fn load_nodes(&self, source: &str, nodes: &[NodeUpsert]) -> Result<LoadStats, AppError> {
        self.load(source, nodes, &[]).await
    }

    pub async fn load_edges(&self, source: &str, edges: &[EdgeUpsert]) -> Result<LoadStats, AppError> {
        self.load(source, &[], edges).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeType, NodeKey, NodeLabel};
    use crate::store::MemoryStore;

    fn phenotypes(n: usize) -> Vec<NodeUpsert> {
        (0..n)
            .map(|i| NodeUpsert::new(NodeLabel::HpoPhenotype, format!("HP:{:07}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_batches_and_idempotence() {
        let store = MemoryStore::new();
        let loader = Loader::new(&store, 2);
        let nodes = phenotypes(5);
        let edges = vec![EdgeUpsert::new(
            EdgeType::HasChild,
            nodes[0].key.clone(),
            nodes[1].key.clone(),
        )];

        let stats = loader.load("hpo.tsv", &nodes, &edges).await.unwrap();
        assert_eq!(
            stats,
            LoadStats {
                nodes: 5,
                edges: 1,
                batches: 4
            }
        );

        loader.load("hpo.tsv", &nodes, &edges).await.unwrap();
        assert_eq!(store.count_nodes().await.unwrap()[&NodeLabel::HpoPhenotype], 5);
        assert_eq!(store.count_edges().await.unwrap()[&EdgeType::HasChild], 1);
    }

    #[tokio::test]
    async fn test_failed_batch_reports_index_and_keeps_earlier_batches() {
        let store = MemoryStore::new();
        let loader = Loader::new(&store, 2);
        let nodes = phenotypes(2);
        let edges = vec![
            EdgeUpsert::new(EdgeType::HasChild, nodes[0].key.clone(), nodes[1].key.clone()),
            EdgeUpsert::new(EdgeType::HasChild, nodes[1].key.clone(), nodes[0].key.clone()),
            EdgeUpsert::new(
                EdgeType::HasChild,
                nodes[0].key.clone(),
                NodeKey::new(NodeLabel::HpoPhenotype, "HP:9999999"),
            ),
        ];

        let err = loader.load("hpo.tsv", &nodes, &edges).await.unwrap_err();
        assert!(matches!(err, AppError::Load { batch: 2, .. }));
        assert_eq!(store.count_edges().await.unwrap()[&EdgeType::HasChild], 2);
    }
}
