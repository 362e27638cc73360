//! Fluent query builder over any [`CypherExecutor`].

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::CypherExecutor;

/// A Cypher query with bound parameters.
///
/// ```ignore
/// let rows = Query::new(&client, "MATCH (n:IcdDisease {id: $id}) RETURN n.label AS label")
///     .param("id", "A00.1")
///     .fetch_all()
///     .await?;
/// ```
pub struct Query<'a, E: CypherExecutor + ?Sized> {
    executor: &'a E,
    cypher: String,
    params: Params,
    // first parameter that failed to serialize, reported on execution
    invalid: Option<String>,
}

impl<'a, E: CypherExecutor + ?Sized> Query<'a, E> {
    pub fn new(executor: &'a E, cypher: &str) -> Self {
        Self {
            executor,
            cypher: cypher.to_string(),
            params: Params::new(),
            invalid: None,
        }
    }

    /// Binds a serializable value to `$name`.
    pub fn param<T: Serialize>(mut self, name: &str, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.params.insert(name.to_string(), json);
            }
            Err(e) => {
                self.invalid
                    .get_or_insert_with(|| format!("parameter '{}': {}", name, e));
            }
        }
        self
    }

    /// Binds a value that is already JSON.
    pub fn param_raw(mut self, name: &str, value: JsonValue) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    fn check(&self) -> Result<(), AppError> {
        match &self.invalid {
            Some(message) => Err(AppError::Query {
                message: message.clone(),
                query: self.cypher.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Executes the query and streams rows.
    pub async fn execute(self) -> Result<RowStream<'a>, AppError> {
        self.check()?;
        self.executor.execute_cypher(&self.cypher, self.params).await
    }

    /// Executes the query and collects all rows.
    pub async fn fetch_all(self) -> Result<Vec<Row>, AppError> {
        self.execute().await?.try_collect().await
    }

    /// Executes the query and returns the first row, if any.
    pub async fn fetch_one(self) -> Result<Option<Row>, AppError> {
        let mut stream = self.execute().await?;
        stream.next().await.transpose()
    }

    /// Executes the query for its side effects.
    pub async fn run(self) -> Result<(), AppError> {
        self.check()?;
        self.executor.run_cypher(&self.cypher, self.params).await
    }
}

/// Adds `executor.query("...")` to every [`CypherExecutor`].
pub trait QueryExt: CypherExecutor {
    fn query(&self, cypher: &str) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(self, cypher)
    }
}

impl<E: CypherExecutor> QueryExt for E {}
