//! PostgreSQL + Apache AGE backend.
//!
//! Cypher runs through AGE's `cypher()` set-returning function. Parameters
//! travel as a single `agtype` map bound to `$1`; they are never spliced into
//! the query text.
//!
//! ```ignore
//! use ontolink::graph::backends::postgres::PostgresClient;
//! use ontolink::graph::QueryExt;
//!
//! let client = PostgresClient::connect("postgresql://localhost/clinical", "ontolink").await?;
//! client.ensure_graph_exists().await?;
//! let rows = client
//!     .query("MATCH (n:IcdChapter) RETURN n.id AS id")
//!     .fetch_all()
//!     .await?;
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::error::AppError;
use crate::graph::cypher::{extract_return_columns, ParseError};
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::{CypherExecutor, GraphClient, SchemaAdmin, Transaction};

const POOL_SIZE: usize = 16;

/// A parameter map in agtype's binary format: version byte `1`, then JSON text.
#[derive(Debug, Clone)]
struct Agtype(String);

impl ToSql for Agtype {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.extend_from_slice(&[1]);
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        // agtype's OID differs per installation
        ty.name() == "agtype"
    }

    to_sql_checked!();
}

/// An agtype result value decoded to JSON.
#[derive(Debug)]
struct AgtypeValue(JsonValue);

impl<'a> FromSql<'a> for AgtypeValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.is_empty() {
            return Ok(AgtypeValue(JsonValue::Null));
        }
        let json_bytes = if raw[0] == 1 { &raw[1..] } else { raw };
        let text = std::str::from_utf8(json_bytes)?;
        let text = text
            .trim_end_matches("::vertex")
            .trim_end_matches("::edge")
            .trim_end_matches("::path");
        Ok(AgtypeValue(serde_json::from_str(text)?))
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "agtype"
    }
}

/// Pooled PostgreSQL client bound to one AGE graph. Cheap to clone.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
    graph_name: Arc<str>,
}

impl PostgresClient {
    /// Builds the pool. No connection is opened until the first query.
    pub async fn connect(connection_string: &str, graph_name: &str) -> Result<Self, AppError> {
        let pg_config: tokio_postgres::Config = connection_string.parse().map_err(|e| {
            AppError::InvalidConfig(format!("invalid PostgreSQL connection string: {}", e))
        })?;

        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| AppError::Connection(format!("failed to create pool: {}", e)))?;

        Ok(Self {
            pool,
            graph_name: Arc::from(graph_name),
        })
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// Checks out a connection and prepares the AGE session on it.
    async fn get_connection(&self) -> Result<Object, AppError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("PostgreSQL unavailable: {}", e)))?;

        conn.batch_execute("LOAD 'age'; SET search_path = ag_catalog, \"$user\", public;")
            .await
            .map_err(|e| AppError::Connection(format!("failed to load AGE: {}", pg_detail(&e))))?;

        Ok(conn)
    }

    /// Creates the AGE graph unless it already exists.
    pub async fn ensure_graph_exists(&self) -> Result<(), AppError> {
        let sql = format!(
            "DO $$ BEGIN
                IF NOT EXISTS (SELECT 1 FROM ag_catalog.ag_graph WHERE name = '{graph}') THEN
                    PERFORM ag_catalog.create_graph('{graph}');
                END IF;
            END $$;",
            graph = self.graph_name
        );
        let conn = self.get_connection().await?;
        conn.batch_execute(&sql)
            .await
            .map_err(|e| AppError::Connection(format!("failed to create graph: {}", pg_detail(&e))))
    }
}

#[async_trait]
impl CypherExecutor for PostgresClient {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        let conn = self.get_connection().await?;
        execute_owned(conn, self.graph_name.clone(), cypher.to_string(), params)
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        drain(self.execute_cypher(cypher, params).await?).await
    }
}

#[async_trait]
impl GraphClient for PostgresClient {
    type Tx<'a> = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx<'_>, AppError> {
        let conn = self.get_connection().await?;
        conn.batch_execute("BEGIN")
            .await
            .map_err(|e| AppError::Connection(format!("failed to begin: {}", pg_detail(&e))))?;

        Ok(PostgresTransaction {
            conn,
            graph_name: self.graph_name.clone(),
            finished: false,
        })
    }

    fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl SchemaAdmin for PostgresClient {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_node_index(&self, label: &str, key: &str) -> Result<(), AppError> {
        // AGE has no uniqueness constraints; a vertex label plus an index on the
        // identity property keeps MERGE lookups fast.
        let sql = format!(
            "DO $$ BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM ag_catalog.ag_label l
                    JOIN ag_catalog.ag_graph g ON g.graphid = l.graph
                    WHERE g.name = '{graph}' AND l.name = '{label}'
                ) THEN
                    PERFORM ag_catalog.create_vlabel('{graph}', '{label}');
                END IF;
            END $$;
            CREATE INDEX IF NOT EXISTS \"{label}_{key}_idx\"
                ON \"{graph}\".\"{label}\"
                (ag_catalog.agtype_access_operator(VARIADIC ARRAY[properties, '\"{key}\"'::agtype]));",
            graph = self.graph_name,
            label = label,
            key = key,
        );
        let conn = self.get_connection().await?;
        conn.batch_execute(&sql).await.map_err(|e| AppError::Query {
            message: format!("failed to index {}.{}: {}", label, key, pg_detail(&e)),
            query: sql.clone(),
        })?;
        tracing::debug!(label, key, "AGE label index ensured");
        Ok(())
    }

    async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> Result<(), AppError> {
        tracing::debug!(
            label,
            property,
            dimensions,
            "AGE has no vector index, embeddings stored as plain lists"
        );
        Ok(())
    }
}

/// A transaction holding one pooled connection until commit or rollback.
pub struct PostgresTransaction {
    conn: Object,
    graph_name: Arc<str>,
    finished: bool,
}

#[async_trait]
impl CypherExecutor for PostgresTransaction {
    async fn execute_cypher(
        &self,
        cypher: &str,
        params: Params,
    ) -> Result<RowStream<'_>, AppError> {
        execute_borrowed(&self.conn, &self.graph_name, cypher, params).await
    }

    async fn run_cypher(&self, cypher: &str, params: Params) -> Result<(), AppError> {
        drain(self.execute_cypher(cypher, params).await?).await
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self) -> Result<(), AppError> {
        self.finished = true;
        self.conn
            .batch_execute("COMMIT")
            .await
            .map_err(|e| AppError::Connection(format!("commit failed: {}", pg_detail(&e))))
    }

    async fn rollback(mut self) -> Result<(), AppError> {
        self.finished = true;
        self.conn
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| AppError::Connection(format!("rollback failed: {}", pg_detail(&e))))
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("PostgresTransaction dropped without commit or rollback");
        }
    }
}

async fn drain(mut stream: RowStream<'_>) -> Result<(), AppError> {
    while let Some(row) = stream.next().await {
        row?;
    }
    Ok(())
}

fn pg_detail(e: &tokio_postgres::Error) -> String {
    e.as_db_error()
        .map(|db| {
            format!(
                "{}: {} ({}){}",
                db.severity(),
                db.message(),
                db.code().code(),
                db.detail().map(|d| format!(" detail: {}", d)).unwrap_or_default()
            )
        })
        .unwrap_or_else(|| e.to_string())
}

fn query_error(cypher: &str, e: &tokio_postgres::Error) -> AppError {
    AppError::Query {
        message: format!("Cypher query failed: {}", pg_detail(e)),
        query: cypher.to_string(),
    }
}

/// Runs a query on a connection borrowed from a transaction.
async fn execute_borrowed<'a>(
    conn: &'a Object,
    graph_name: &str,
    cypher: &str,
    params: Params,
) -> Result<RowStream<'a>, AppError> {
    let (sql, param) = build_age_query(graph_name, cypher, &params)?;

    let stream = match &param {
        None => conn.query_raw::<_, &Agtype, _>(&sql, std::iter::empty()).await,
        Some(param) => conn.query_raw(&sql, std::iter::once(param)).await,
    }
    .map_err(|e| query_error(cypher, &e))?;

    Ok(Box::pin(stream.map_ok(|row| parse_pg_row(&row)).map_err(
        |e| AppError::Connection(format!("failed to fetch row: {}", e)),
    )))
}

/// Runs an auto-commit query; the stream owns the connection until it ends.
fn execute_owned(
    conn: Object,
    graph_name: Arc<str>,
    cypher: String,
    params: Params,
) -> Result<RowStream<'static>, AppError> {
    use async_stream::try_stream;

    let (sql, param) = build_age_query(&graph_name, &cypher, &params)?;

    Ok(Box::pin(try_stream! {
        let stream = match &param {
            None => conn.query_raw::<_, &Agtype, _>(&sql, std::iter::empty()).await,
            Some(param) => conn.query_raw(&sql, std::iter::once(param)).await,
        }
        .map_err(|e| query_error(&cypher, &e))?;

        futures::pin_mut!(stream);
        while let Some(pg_row) = stream
            .try_next()
            .await
            .map_err(|e| AppError::Connection(format!("failed to fetch row: {}", e)))?
        {
            yield parse_pg_row(&pg_row);
        }
    }))
}

/// Wraps Cypher in the AGE `cypher()` call.
///
/// The SQL column list mirrors the final RETURN clause (`RETURN a, r AS rel`
/// becomes `("a" agtype, "rel" agtype)`). Write-only statements get a single
/// placeholder column.
fn build_age_query(
    graph_name: &str,
    cypher: &str,
    params: &Params,
) -> Result<(String, Option<Agtype>), AppError> {
    let columns = match extract_return_columns(cypher) {
        Ok(columns) => columns
            .iter()
            .map(|name| format!("\"{}\" agtype", name.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", "),
        Err(ParseError::NoReturnClause) => "result agtype".to_string(),
        Err(e) => {
            return Err(AppError::Query {
                message: e.to_string(),
                query: cypher.to_string(),
            })
        }
    };

    if params.is_empty() {
        let sql = format!(
            "SELECT * FROM cypher('{}', $$ {} $$) as ({})",
            graph_name, cypher, columns
        );
        return Ok((sql, None));
    }

    let sql = format!(
        "SELECT * FROM cypher('{}', $$ {} $$, $1) as ({})",
        graph_name, cypher, columns
    );
    let json = serde_json::to_string(params).map_err(|e| AppError::Query {
        message: format!("failed to serialize parameters: {}", e),
        query: cypher.to_string(),
    })?;
    Ok((sql, Some(Agtype(json))))
}

fn parse_pg_row(pg_row: &tokio_postgres::Row) -> Row {
    let data: HashMap<String, JsonValue> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = pg_value(pg_row, idx, column.type_()).unwrap_or(JsonValue::Null);
            (column.name().to_string(), value)
        })
        .collect();
    Row::new(data)
}

fn pg_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Option<JsonValue> {
    match ty.name() {
        "agtype" => row.try_get::<_, AgtypeValue>(idx).ok().map(|v| v.0),
        "int2" => row.try_get::<_, i16>(idx).ok().map(JsonValue::from),
        "int4" => row.try_get::<_, i32>(idx).ok().map(JsonValue::from),
        "int8" => row.try_get::<_, i64>(idx).ok().map(JsonValue::from),
        "float4" => row.try_get::<_, f32>(idx).ok().map(|v| JsonValue::from(v as f64)),
        "float8" => row.try_get::<_, f64>(idx).ok().map(JsonValue::from),
        "bool" => row.try_get::<_, bool>(idx).ok().map(JsonValue::Bool),
        "json" | "jsonb" => row.try_get::<_, JsonValue>(idx).ok(),
        "_text" => row
            .try_get::<_, Vec<String>>(idx)
            .ok()
            .map(|v| JsonValue::Array(v.into_iter().map(JsonValue::String).collect())),
        _ => row.try_get::<_, String>(idx).ok().map(JsonValue::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_age_query_without_params() {
        let (sql, param) = build_age_query(
            "ontolink",
            "MATCH (n:IcdChapter) RETURN n.id AS id",
            &Params::new(),
        )
        .unwrap();

        assert_eq!(
            sql,
            "SELECT * FROM cypher('ontolink', $$ MATCH (n:IcdChapter) RETURN n.id AS id $$) as (\"id\" agtype)"
        );
        assert!(param.is_none());
    }

    #[test]
    fn test_build_age_query_binds_params_as_agtype() {
        let mut params = Params::new();
        params.insert("id".to_string(), JsonValue::String("A00-A09".to_string()));

        let (sql, param) = build_age_query(
            "ontolink",
            "MATCH (g:IcdGroup {id: $id}) RETURN g.label AS label",
            &params,
        )
        .unwrap();

        assert!(sql.contains("$$, $1) as (\"label\" agtype)"));
        assert!(param.unwrap().0.contains("A00-A09"));
    }

    #[test]
    fn test_build_age_query_quotes_reserved_column_names() {
        let (sql, _) = build_age_query(
            "ontolink",
            "MATCH ()-[r:HAS_CHILD]->() RETURN count(r) AS count",
            &Params::new(),
        )
        .unwrap();
        assert!(sql.ends_with("as (\"count\" agtype)"));
    }

    #[test]
    fn test_build_age_query_write_only_uses_placeholder() {
        let mut params = Params::new();
        params.insert("rows".to_string(), serde_json::json!([]));

        let (sql, _) = build_age_query(
            "ontolink",
            "UNWIND $rows AS row MERGE (n:HpoPhenotype {id: row.id})",
            &params,
        )
        .unwrap();
        assert!(sql.ends_with("as (result agtype)"));
    }

    #[test]
    fn test_build_age_query_rejects_return_star() {
        let result = build_age_query("ontolink", "MATCH (n) RETURN *", &Params::new());
        assert!(matches!(result, Err(AppError::Query { .. })));
    }

    #[test]
    fn test_agtype_value_strips_vertex_suffix() {
        let raw = b"\x01{\"id\": 1, \"label\": \"IcdDisease\", \"properties\": {}}::vertex";
        let value = AgtypeValue::from_sql(&Type::TEXT, raw).unwrap();
        assert_eq!(value.0["label"], "IcdDisease");
    }
}
