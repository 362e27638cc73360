//! Graph database backends.
//!
//! | Backend | Module | Transactions | Vector index |
//! |---------|--------|--------------|--------------|
//! | PostgreSQL + Apache AGE | [`postgres`] | yes | no |
//! | Neo4j | [`neo4j`] | yes | yes (5.11+) |
//!
//! A backend provides a client implementing [`GraphClient`](crate::graph::GraphClient)
//! and [`SchemaAdmin`](crate::graph::SchemaAdmin), and a transaction type implementing
//! [`CypherExecutor`](crate::graph::CypherExecutor) and
//! [`Transaction`](crate::graph::Transaction).

pub mod neo4j;
pub mod postgres;
