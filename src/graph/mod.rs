//! Backend-agnostic access to Cypher graph databases.
//!
//! The same store code runs against PostgreSQL + Apache AGE and Neo4j:
//!
//! - [`CypherExecutor`] executes Cypher (clients auto-commit, transactions scope)
//! - [`Transaction`] commits or rolls back
//! - [`GraphClient`] opens transactions
//! - [`SchemaAdmin`] creates the indexes imports rely on
//!
//! ```ignore
//! use ontolink::graph::{GraphClient, QueryExt, Transaction};
//!
//! let txn = client.begin().await?;
//! txn.query("MERGE (n:HpoPhenotype {id: $id}) SET n.label = $label")
//!     .param("id", "HP:0001250")
//!     .param("label", "Seizure")
//!     .run()
//!     .await?;
//! txn.commit().await?;
//! ```

mod cypher;
mod query;
mod row;
mod traits;

pub mod backends;

pub use cypher::{extract_return_columns, ParseError};
pub use query::{Query, QueryExt};
pub use row::{Params, Row, RowStream};
pub use traits::{CypherExecutor, GraphClient, SchemaAdmin, Transaction};
