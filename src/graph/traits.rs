//! Core traits a graph backend implements.
//!
//! - [`CypherExecutor`] runs Cypher (auto-commit on clients, scoped on transactions)
//! - [`Transaction`] commits or rolls back
//! - [`GraphClient`] owns the pool and opens transactions
//! - [`SchemaAdmin`] creates the uniqueness and vector indexes an import relies on

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::row::{Params, RowStream};

/// Executes Cypher queries against a graph database.
#[async_trait]
pub trait CypherExecutor: Send + Sync {
    /// Executes a query and streams its result rows.
    async fn execute_cypher(&self, cypher: &str, params: Params)
        -> Result<RowStream<'_>, AppError>;

    /// Executes a query for its side effects (MERGE, SET, DELETE).
    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError>;
}

/// Transaction lifecycle. Both methods consume the transaction.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}

/// A graph database client that can begin transactions.
#[async_trait]
pub trait GraphClient: CypherExecutor {
    /// The transaction type returned by this client.
    type Tx<'a>: Transaction + CypherExecutor
    where
        Self: 'a;

    /// Begins a new transaction. The caller must commit or roll it back.
    async fn begin(&self) -> Result<Self::Tx<'_>, AppError>;

    /// Releases pooled connections. Later calls fail.
    fn close(&self) {}
}

/// Schema operations that differ per backend.
///
/// All methods must be idempotent: `init` and every import call them.
#[async_trait]
pub trait SchemaAdmin: Send + Sync {
    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Ensures `label` exists and lookups on `key` are indexed.
    async fn ensure_node_index(&self, label: &str, key: &str) -> Result<(), AppError>;

    /// Ensures a vector index on `label.property`, where the backend has them.
    async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> Result<(), AppError>;
}
