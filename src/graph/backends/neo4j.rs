//! Neo4j backend over the Bolt protocol.
//!
//! Rows are read by the column names of the final RETURN clause, the same
//! extraction the AGE backend uses for its SQL column list.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream;
use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Txn};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::graph::cypher::{extract_return_columns, ParseError};
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::{CypherExecutor, GraphClient, SchemaAdmin, Transaction};

/// Neo4j client. `neo4rs::Graph` pools connections internally and is cheap to clone.
#[derive(Clone)]
pub struct Neo4jClient {
    graph: Graph,
}

impl Neo4jClient {
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Self, AppError> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .db(database)
            .build()?;
        let graph = Graph::connect(config)
            .await
            .map_err(|e| AppError::Connection(format!("Neo4j at {} unavailable: {}", uri, e)))?;
        Ok(Self { graph })
    }
}

#[async_trait]
impl CypherExecutor for Neo4jClient {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        let columns = return_columns(cypher)?;
        let mut result = self.graph.execute(bolt_query(cypher, params)).await?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(Ok(read_row(&row, &columns)?));
        }
        Ok(Box::pin(stream::iter(rows)))
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        self.graph.run(bolt_query(cypher, params)).await?;
        Ok(())
    }
}

#[async_trait]
impl GraphClient for Neo4jClient {
    type Tx<'a> = Neo4jTransaction;

    async fn begin(&self) -> Result<Self::Tx<'_>, AppError> {
        let txn = self.graph.start_txn().await?;
        Ok(Neo4jTransaction {
            txn: Mutex::new(txn),
        })
    }
}

#[async_trait]
impl SchemaAdmin for Neo4jClient {
    fn backend_name(&self) -> &'static str {
        "neo4j"
    }

    async fn ensure_node_index(&self, label: &str, key: &str) -> Result<(), AppError> {
        let statement = format!(
            "CREATE CONSTRAINT {lower}_{key}_unique IF NOT EXISTS \
             FOR (n:{label}) REQUIRE n.{key} IS UNIQUE",
            lower = label.to_lowercase(),
            label = label,
            key = key,
        );
        self.graph.run(query(&statement)).await?;
        Ok(())
    }

    async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> Result<(), AppError> {
        let statement = format!(
            "CREATE VECTOR INDEX {lower}_{property} IF NOT EXISTS \
             FOR (n:{label}) ON n.{property} \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {dimensions}, \
             `vector.similarity_function`: 'cosine'}}}}",
            lower = label.to_lowercase(),
            label = label,
            property = property,
            dimensions = dimensions,
        );
        // Older servers have no vector indexes
        if let Err(e) = self.graph.run(query(&statement)).await {
            tracing::warn!(label, "Could not create vector index: {}", e);
        }
        Ok(())
    }
}

/// An explicit Neo4j transaction.
pub struct Neo4jTransaction {
    txn: Mutex<Txn>,
}

#[async_trait]
impl CypherExecutor for Neo4jTransaction {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        let columns = return_columns(cypher)?;
        let mut txn = self.txn.lock().await;
        let mut result = txn.execute(bolt_query(cypher, params)).await?;

        let mut rows = Vec::new();
        while let Some(row) = result.next(txn.handle()).await? {
            rows.push(Ok(read_row(&row, &columns)?));
        }
        Ok(Box::pin(stream::iter(rows)))
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        let mut txn = self.txn.lock().await;
        txn.run(bolt_query(cypher, params)).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for Neo4jTransaction {
    async fn commit(self) -> Result<(), AppError> {
        self.txn.into_inner().commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.txn.into_inner().rollback().await?;
        Ok(())
    }
}

fn return_columns(cypher: &str) -> Result<Vec<String>, AppError> {
    match extract_return_columns(cypher) {
        Ok(columns) => Ok(columns),
        Err(ParseError::NoReturnClause) => Ok(Vec::new()),
        Err(e) => Err(AppError::Query {
            message: e.to_string(),
            query: cypher.to_string(),
        }),
    }
}

fn bolt_query(cypher: &str, params: Params) -> neo4rs::Query {
    params
        .into_iter()
        .fold(query(cypher), |q, (name, value)| q.param(&name, to_bolt(value)))
}

fn read_row(row: &neo4rs::Row, columns: &[String]) -> Result<Row, AppError> {
    let mut data = HashMap::with_capacity(columns.len());
    for column in columns {
        let value: JsonValue = row.get(column).map_err(|e| {
            AppError::Internal(format!("failed to read column '{}': {}", column, e))
        })?;
        data.insert(column.clone(), value);
    }
    Ok(Row::new(data))
}

/// Converts a JSON parameter to its Bolt equivalent.
fn to_bolt(value: JsonValue) -> BoltType {
    match value {
        JsonValue::Null => BoltType::Null(BoltNull),
        JsonValue::Bool(b) => BoltType::from(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => BoltType::from(s),
        JsonValue::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
        JsonValue::Object(entries) => {
            let mut map = BoltMap::new();
            for (key, item) in entries {
                map.put(BoltString::from(key.as_str()), to_bolt(item));
            }
            BoltType::Map(map)
        }
    }
}
