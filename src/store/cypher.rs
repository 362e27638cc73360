//! [`GraphStore`] over any Cypher backend (AGE or Neo4j).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::{CypherExecutor, GraphClient, Params, QueryExt, Row, SchemaAdmin, Transaction};
use crate::models::{EdgeType, EdgeUpsert, NodeKey, NodeLabel, NodeUpsert, OntologyNode, Properties};

use super::{Batch, GraphStore, NodeQuery};

/// Store writing one MERGE statement per node or edge inside a transaction.
pub struct CypherStore<C> {
    client: C,
}

impl<C> CypherStore<C>
where
    C: GraphClient + SchemaAdmin + 'static,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C> GraphStore for CypherStore<C>
where
    C: GraphClient + SchemaAdmin + 'static,
{
    fn backend_name(&self) -> &'static str {
        self.client.backend_name()
    }

    async fn ensure_schema(&self, dimensions: usize) -> Result<(), AppError> {
        for label in NodeLabel::ALL {
            self.client.ensure_node_index(label.as_str(), "id").await?;
        }
        for label in NodeLabel::EMBEDDABLE {
            self.client
                .ensure_vector_index(label.as_str(), "embedding", dimensions)
                .await?;
        }
        tracing::info!(backend = self.backend_name(), "Schema ensured");
        Ok(())
    }

    async fn run_batch(&self, batch: &Batch) -> Result<(), AppError> {
        if batch.is_empty() {
            return Ok(());
        }

        let tx = self.client.begin().await?;
        match apply(&tx, batch).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn fetch_nodes(&self, query: &NodeQuery) -> Result<Vec<OntologyNode>, AppError> {
        let cypher = fetch_statement(query);
        let rows = self.client.query(&cypher).fetch_all().await?;
        rows.iter().map(|row| row_to_node(row, query.label)).collect()
    }

    async fn count_nodes(&self) -> Result<BTreeMap<NodeLabel, usize>, AppError> {
        let mut counts = BTreeMap::new();
        for label in NodeLabel::ALL {
            let cypher = format!("MATCH (n:{}) RETURN count(n) AS count", label);
            let count = match self.client.query(&cypher).fetch_one().await? {
                Some(row) => row.get_count("count")?,
                None => 0,
            };
            counts.insert(label, count as usize);
        }
        Ok(counts)
    }

    async fn count_edges(&self) -> Result<BTreeMap<EdgeType, usize>, AppError> {
        let mut counts = BTreeMap::new();
        for edge_type in EdgeType::ALL {
            let cypher = format!("MATCH ()-[r:{}]->() RETURN count(r) AS count", edge_type);
            let count = match self.client.query(&cypher).fetch_one().await? {
                Some(row) => row.get_count("count")?,
                None => 0,
            };
            counts.insert(edge_type, count as usize);
        }
        Ok(counts)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.client.close();
        tracing::debug!(backend = self.backend_name(), "Store closed");
        Ok(())
    }
}

async fn apply<E: CypherExecutor>(executor: &E, batch: &Batch) -> Result<(), AppError> {
    for node in &batch.nodes {
        let (cypher, params) = node_statement(node)?;
        executor.run_cypher(&cypher, params).await?;
    }
    for edge in &batch.edges {
        let (cypher, params) = edge_statement(edge)?;
        executor.run_cypher(&cypher, params).await?;
    }
    Ok(())
}

/// `MERGE (n:Label {id: $id}) SET n.a = $p0, n.b = coalesce(n.b, $c0), ...`
///
/// Create-only properties go through `coalesce` rather than `ON CREATE SET`,
/// which AGE does not support.
fn node_statement(node: &NodeUpsert) -> Result<(String, Params), AppError> {
    let mut params = Params::new();
    params.insert("id".to_string(), node.id().into());

    let mut cypher = format!("MERGE (n:{} {{id: $id}})", node.label());
    let mut assignments = assignments(&cypher, &mut params, "n", &node.properties)?;
    for (i, (name, value)) in node.on_create.iter().enumerate() {
        check_property_name(name, &cypher)?;
        let param = format!("c{}", i);
        assignments.push(format!("n.{name} = coalesce(n.{name}, ${param})"));
        params.insert(param, value.clone());
    }
    push_set(&mut cypher, &assignments);
    Ok((cypher, params))
}

/// `MATCH (a:From {id: $from}), (b:To {id: $to}) MERGE (a)-[r:TYPE]->(b) SET ...`
fn edge_statement(edge: &EdgeUpsert) -> Result<(String, Params), AppError> {
    let mut params = Params::new();
    params.insert("from".to_string(), edge.from.id.as_str().into());
    params.insert("to".to_string(), edge.to.id.as_str().into());

    let mut cypher = format!(
        "MATCH (a:{} {{id: $from}}), (b:{} {{id: $to}}) MERGE (a)-[r:{}]->(b)",
        edge.from.label, edge.to.label, edge.edge_type
    );
    let assignments = assignments(&cypher, &mut params, "r", &edge.properties)?;
    push_set(&mut cypher, &assignments);
    Ok((cypher, params))
}

fn assignments(
    cypher: &str,
    params: &mut Params,
    var: &str,
    properties: &Properties,
) -> Result<Vec<String>, AppError> {
    let mut assignments = Vec::with_capacity(properties.len());
    for (i, (name, value)) in properties.iter().enumerate() {
        check_property_name(name, cypher)?;
        let param = format!("p{}", i);
        assignments.push(format!("{}.{} = ${}", var, name, param));
        params.insert(param, value.clone());
    }
    Ok(assignments)
}

fn push_set(cypher: &mut String, assignments: &[String]) {
    if !assignments.is_empty() {
        cypher.push_str(" SET ");
        cypher.push_str(&assignments.join(", "));
    }
}

/// Property names are spliced into the statement, so only plain identifiers pass.
fn check_property_name(name: &str, cypher: &str) -> Result<(), AppError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Query {
            message: format!("invalid property name '{}'", name),
            query: cypher.to_string(),
        })
    }
}

fn fetch_statement(query: &NodeQuery) -> String {
    let mut conditions = Vec::new();
    if query.unlinked {
        conditions.push("n.parent IS NULL AND size(n.parent_refs) > 0");
    }
    if query.missing_embedding {
        conditions.push("n.embedding IS NULL");
    }

    let mut cypher = format!("MATCH (n:{})", query.label);
    if !conditions.is_empty() {
        cypher.push_str(" WHERE ");
        cypher.push_str(&conditions.join(" AND "));
    }
    cypher.push_str(
        " RETURN n.id AS id, n.label AS label, n.parent_refs AS parent_refs, \
         n.parent AS parent, n.embedding IS NOT NULL AS embedded, \
         n.chapter_refs AS chapter_refs, n.chapter_parent AS chapter_parent, \
         n.umls_ids AS umls_ids ORDER BY n.id",
    );
    cypher
}

fn row_to_node(row: &Row, label: NodeLabel) -> Result<OntologyNode, AppError> {
    let ontology = label
        .ontology()
        .ok_or_else(|| AppError::Internal(format!("{} is not an ontology label", label)))?;

    Ok(OntologyNode {
        key: NodeKey::new(label, row.get::<String>("id")?),
        label: row.get_opt("label")?.unwrap_or_default(),
        ontology,
        parent_refs: row.get_opt("parent_refs")?.unwrap_or_default(),
        parent: row.get_opt("parent")?,
        embedded: row.get_opt("embedded")?.unwrap_or(false),
        chapter_refs: row.get_opt("chapter_refs")?.unwrap_or_default(),
        chapter_parent: row.get_opt("chapter_parent")?,
        umls_ids: row.get_opt("umls_ids")?.unwrap_or_default(),
    })
}
