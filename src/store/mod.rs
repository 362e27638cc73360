//! The graph store capability the pipeline writes through.
//!
//! Parsing, hierarchy and mapping code only sees [`GraphStore`]; which
//! database sits behind it is decided once, in [`open_store`].

mod cypher;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Backend, Config};
use crate::error::AppError;
use crate::graph::backends::neo4j::Neo4jClient;
use crate::graph::backends::postgres::PostgresClient;
use crate::models::{EdgeType, EdgeUpsert, NodeLabel, NodeUpsert, OntologyNode};

pub use cypher::CypherStore;
pub use memory::MemoryStore;

/// Node and edge writes applied together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub nodes: Vec<NodeUpsert>,
    pub edges: Vec<EdgeUpsert>,
}

impl Batch {
    pub fn nodes(nodes: Vec<NodeUpsert>) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    pub fn edges(edges: Vec<EdgeUpsert>) -> Self {
        Self {
            nodes: Vec::new(),
            edges,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Filter for [`GraphStore::fetch_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeQuery {
    pub label: NodeLabel,
    /// Only nodes with parent candidates but no linked parent.
    pub unlinked: bool,
    /// Only nodes without an embedding vector.
    pub missing_embedding: bool,
}

impl NodeQuery {
    pub fn all(label: NodeLabel) -> Self {
        Self {
            label,
            unlinked: false,
            missing_embedding: false,
        }
    }

    pub fn unlinked(mut self) -> Self {
        self.unlinked = true;
        self
    }

    pub fn missing_embedding(mut self) -> Self {
        self.missing_embedding = true;
        self
    }
}

/// Merge-by-identity writes plus the reads the pipeline needs.
///
/// Node upserts set only the properties they carry. Edge upserts never
/// duplicate an edge between the same two nodes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Creates labels, identity indexes and vector indexes. Idempotent.
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), AppError>;

    async fn upsert_node(&self, node: &NodeUpsert) -> Result<(), AppError> {
        self.run_batch(&Batch::nodes(vec![node.clone()])).await
    }

    async fn upsert_edge(&self, edge: &EdgeUpsert) -> Result<(), AppError> {
        self.run_batch(&Batch::edges(vec![edge.clone()])).await
    }

    /// Applies a batch in one transaction: nodes first, then edges. On error
    /// nothing of the batch is kept.
    async fn run_batch(&self, batch: &Batch) -> Result<(), AppError>;

    /// Ontology nodes of one label, ordered by id.
    async fn fetch_nodes(&self, query: &NodeQuery) -> Result<Vec<OntologyNode>, AppError>;

    async fn count_nodes(&self) -> Result<BTreeMap<NodeLabel, usize>, AppError>;

    async fn count_edges(&self) -> Result<BTreeMap<EdgeType, usize>, AppError>;

    /// Flushes and releases the connection.
    async fn close(&self) -> Result<(), AppError>;
}

/// Opens the backend selected in `config.store`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn GraphStore>, AppError> {
    match config.store.backend {
        Backend::Postgres => {
            tracing::info!(graph = %config.postgres.graph, "Connecting to PostgreSQL + AGE");
            let client =
                PostgresClient::connect(&config.postgres.uri, &config.postgres.graph).await?;
            client.ensure_graph_exists().await?;
            Ok(Arc::new(CypherStore::new(client)))
        }
        Backend::Neo4j => {
            tracing::info!(uri = %config.neo4j.uri, "Connecting to Neo4j");
            let client = Neo4jClient::connect(
                &config.neo4j.uri,
                &config.neo4j.user,
                &config.neo4j.password,
                config.neo4j.database.as_deref().unwrap_or("neo4j"),
            )
            .await?;
            Ok(Arc::new(CypherStore::new(client)))
        }
        Backend::Memory => {
            let store = match &config.memory.snapshot {
                Some(path) => MemoryStore::open(path)?,
                None => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
    }
}
