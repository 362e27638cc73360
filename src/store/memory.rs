//! In-process store for dry runs and tests, optionally persisted as JSON.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppError;
use crate::models::{EdgeType, NodeKey, NodeLabel, OntologyNode, Properties};

use super::{Batch, GraphStore, NodeQuery};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct EdgeKey {
    edge_type: EdgeType,
    from: NodeKey,
    to: NodeKey,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<NodeKey, Properties>,
    edges: BTreeMap<EdgeKey, Properties>,
}

/// On-disk form. JSON object keys must be strings, so entries are lists.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    nodes: Vec<(NodeKey, Properties)>,
    edges: Vec<(EdgeKey, Properties)>,
}

/// Graph held in memory. With a snapshot path, the graph is read on open
/// and written back on [`close`](GraphStore::close).
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`. A missing file starts an empty graph.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut state = State::default();
        if path.exists() {
            let file = File::open(path).map_err(|e| AppError::io(path, e))?;
            let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| AppError::Internal(format!("corrupt snapshot {}: {}", path.display(), e)))?;
            state.nodes = snapshot.nodes.into_iter().collect();
            state.edges = snapshot.edges.into_iter().collect();
            tracing::info!(
                path = %path.display(),
                nodes = state.nodes.len(),
                edges = state.edges.len(),
                "Loaded memory snapshot"
            );
        }
        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(path.to_path_buf()),
        })
    }

    /// Properties of one node, if it exists.
    pub fn node(&self, key: &NodeKey) -> Option<Properties> {
        self.lock().ok()?.nodes.get(key).cloned()
    }

    /// Keys of every node with `label`, in key order.
    pub fn node_keys(&self, label: NodeLabel) -> Vec<NodeKey> {
        self.lock()
            .map(|state| {
                state
                    .nodes
                    .keys()
                    .filter(|key| key.label == label)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Properties of one edge, if it exists.
    pub fn edge(&self, edge_type: EdgeType, from: &NodeKey, to: &NodeKey) -> Option<Properties> {
        let key = EdgeKey {
            edge_type,
            from: from.clone(),
            to: to.clone(),
        };
        self.lock().ok()?.edges.get(&key).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }

    fn save(&self, path: &Path) -> Result<(), AppError> {
        let snapshot = {
            let state = self.lock()?;
            Snapshot {
                nodes: state.nodes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                edges: state.edges.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            }
        };
        let file = File::create(path).map_err(|e| AppError::io(path, e))?;
        serde_json::to_writer(BufWriter::new(file), &snapshot)
            .map_err(|e| AppError::Internal(format!("failed to write snapshot: {}", e)))?;
        tracing::info!(path = %path.display(), "Saved memory snapshot");
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self, _dimensions: usize) -> Result<(), AppError> {
        Ok(())
    }

    async fn run_batch(&self, batch: &Batch) -> Result<(), AppError> {
        let mut state = self.lock()?;

        // Edges are checked before anything is written so a rejected batch leaves no trace.
        for edge in &batch.edges {
            for endpoint in [&edge.from, &edge.to] {
                let known = state.nodes.contains_key(endpoint)
                    || batch.nodes.iter().any(|n| &n.key == endpoint);
                if !known {
                    return Err(AppError::Query {
                        message: format!("{} endpoint {} does not exist", edge.edge_type, endpoint),
                        query: format!("{} -> {}", edge.from, edge.to),
                    });
                }
            }
        }

        for node in &batch.nodes {
            let properties = state.nodes.entry(node.key.clone()).or_default();
            for (name, value) in &node.properties {
                properties.insert(name.clone(), value.clone());
            }
            for (name, value) in &node.on_create {
                match properties.get(name) {
                    Some(existing) if !existing.is_null() => {}
                    _ => {
                        properties.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        for edge in &batch.edges {
            let key = EdgeKey {
                edge_type: edge.edge_type,
                from: edge.from.clone(),
                to: edge.to.clone(),
            };
            let properties = state.edges.entry(key).or_default();
            for (name, value) in &edge.properties {
                properties.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn fetch_nodes(&self, query: &NodeQuery) -> Result<Vec<OntologyNode>, AppError> {
        let ontology = query
            .label
            .ontology()
            .ok_or_else(|| AppError::Internal(format!("{} is not an ontology label", query.label)))?;
        let state = self.lock()?;

        let nodes = state
            .nodes
            .iter()
            .filter(|(key, _)| key.label == query.label)
            .map(|(key, properties)| OntologyNode {
                key: key.clone(),
                label: string_property(properties, "label").unwrap_or_default(),
                ontology,
                parent_refs: properties
                    .get("parent_refs")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                parent: string_property(properties, "parent"),
                embedded: properties
                    .get("embedding")
                    .is_some_and(|v| !v.is_null()),
                chapter_refs: properties
                    .get("chapter_refs")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                chapter_parent: string_property(properties, "chapter_parent"),
                umls_ids: properties
                    .get("umls_ids")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
            })
            .filter(|node| !query.unlinked || (node.parent.is_none() && !node.parent_refs.is_empty()))
            .filter(|node| !query.missing_embedding || !node.embedded)
            .collect();
        Ok(nodes)
    }

    async fn count_nodes(&self) -> Result<BTreeMap<NodeLabel, usize>, AppError> {
        let state = self.lock()?;
        let mut counts: BTreeMap<NodeLabel, usize> =
            NodeLabel::ALL.iter().map(|label| (*label, 0)).collect();
        for key in state.nodes.keys() {
            *counts.entry(key.label).or_default() += 1;
        }
        Ok(counts)
    }

    async fn count_edges(&self) -> Result<BTreeMap<EdgeType, usize>, AppError> {
        let state = self.lock()?;
        let mut counts: BTreeMap<EdgeType, usize> =
            EdgeType::ALL.iter().map(|t| (*t, 0)).collect();
        for key in state.edges.keys() {
            *counts.entry(key.edge_type).or_default() += 1;
        }
        Ok(counts)
    }

    async fn close(&self) -> Result<(), AppError> {
        match &self.snapshot {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }
}

fn string_property(properties: &Properties, name: &str) -> Option<String> {
    match properties.get(name) {
        Some(JsonValue::String(s)) => Some(s.clone()),
        _ => None,
    }
}
