//! Nodes and edges as they flow from importers to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::ontology::{EdgeType, NodeLabel, Ontology};
use crate::hierarchy::ParentRef;

/// Property map of a node or edge.
pub type Properties = serde_json::Map<String, JsonValue>;

/// Identity of a node: its label and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub id: String,
}

impl NodeKey {
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            label,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.label, self.id)
    }
}

/// A merge-by-identity node write. Only the listed properties are touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpsert {
    pub key: NodeKey,
    pub properties: Properties,
    /// Written only while the property is absent, so the first write sticks.
    #[serde(default)]
    pub on_create: Properties,
}

impl NodeUpsert {
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            key: NodeKey::new(label, id),
            properties: Properties::new(),
            on_create: Properties::new(),
        }
    }

    /// Sets a property. Values that fail to serialize are stored as null.
    pub fn with(mut self, name: &str, value: impl Serialize) -> Self {
        self.properties.insert(
            name.to_string(),
            serde_json::to_value(value).unwrap_or(JsonValue::Null),
        );
        self
    }

    /// Sets a property unless the stored node already has it.
    pub fn with_on_create(mut self, name: &str, value: impl Serialize) -> Self {
        self.on_create.insert(
            name.to_string(),
            serde_json::to_value(value).unwrap_or(JsonValue::Null),
        );
        self
    }

    pub fn label(&self) -> NodeLabel {
        self.key.label
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }
}

/// A merge-by-identity edge write between two existing nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeUpsert {
    pub edge_type: EdgeType,
    pub from: NodeKey,
    pub to: NodeKey,
    pub properties: Properties,
}

impl EdgeUpsert {
    pub fn new(edge_type: EdgeType, from: NodeKey, to: NodeKey) -> Self {
        Self {
            edge_type,
            from,
            to,
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Serialize) -> Self {
        self.properties.insert(
            name.to_string(),
            serde_json::to_value(value).unwrap_or(JsonValue::Null),
        );
        self
    }
}

/// An ontology node as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyNode {
    pub key: NodeKey,
    /// Display label (term title).
    pub label: String,
    pub ontology: Ontology,
    /// Parent candidates recorded at import time.
    #[serde(default)]
    pub parent_refs: Vec<String>,
    /// Id of the linked parent, once the hierarchy edge exists.
    #[serde(default)]
    pub parent: Option<String>,
    /// Whether an embedding vector is stored. The vector itself is not read back.
    #[serde(default)]
    pub embedded: bool,
    /// Chapter candidates of an ICD10 code.
    #[serde(default)]
    pub chapter_refs: Vec<String>,
    /// Id of the linked chapter, once the chapter edge exists.
    #[serde(default)]
    pub chapter_parent: Option<String>,
    /// UMLS concept ids attached by earlier mapping runs.
    #[serde(default)]
    pub umls_ids: Vec<String>,
}

impl OntologyNode {
    pub fn id(&self) -> &str {
        &self.key.id
    }

    /// Parsed `parent_refs`.
    pub fn parent_candidates(&self) -> Vec<ParentRef> {
        self.parent_refs.iter().map(|r| ParentRef::parse(r)).collect()
    }

    /// Parsed `chapter_refs`.
    pub fn chapter_candidates(&self) -> Vec<ParentRef> {
        self.chapter_refs.iter().map(|r| ParentRef::parse(r)).collect()
    }
}

/// Parent to child link within one ontology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HierarchyEdge {
    pub edge_type: EdgeType,
    pub parent: NodeKey,
    pub child: NodeKey,
}

impl From<HierarchyEdge> for EdgeUpsert {
    fn from(edge: HierarchyEdge) -> Self {
        EdgeUpsert::new(edge.edge_type, edge.parent, edge.child)
    }
}

/// ICD10 to HPO link through shared UMLS concepts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CrossMapEdge {
    pub icd10: String,
    pub hpo: String,
    /// Sorted UMLS concept identifiers shared by both codes.
    pub cuis: Vec<String>,
}

impl From<CrossMapEdge> for EdgeUpsert {
    fn from(edge: CrossMapEdge) -> Self {
        EdgeUpsert::new(
            EdgeType::UmlsCrossMap,
            NodeKey::new(NodeLabel::IcdDisease, edge.icd10),
            NodeKey::new(NodeLabel::HpoPhenotype, edge.hpo),
        )
        .with("cuis", edge.cuis)
    }
}

/// One annotated patient row of an ingestion batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientAnnotation {
    pub patient_id: String,
    /// SHA-256 of the source file contents.
    pub batch_id: String,
    pub source: String,
    pub line: usize,
    pub ingested_at: DateTime<Utc>,
    /// Resolved target node and the column it came from.
    pub targets: Vec<(NodeKey, String)>,
}

impl PatientAnnotation {
    /// `<batch>:<line>`, stable across re-runs of the same file.
    pub fn id(&self) -> String {
        format!("{}:{}", self.batch_id, self.line)
    }

    /// Node and edge writes for this annotation.
    pub fn to_upserts(&self) -> (Vec<NodeUpsert>, Vec<EdgeUpsert>) {
        let annotation_id = self.id();
        let patient = NodeKey::new(NodeLabel::Patient, &self.patient_id);
        let annotation = NodeKey::new(NodeLabel::PatientAnnotation, &annotation_id);

        let nodes = vec![
            NodeUpsert::new(NodeLabel::Patient, &self.patient_id),
            NodeUpsert::new(NodeLabel::PatientAnnotation, &annotation_id)
                .with("patient_id", &self.patient_id)
                .with("batch_id", &self.batch_id)
                .with("source", &self.source)
                .with("line", self.line)
                .with_on_create("ingested_at", self.ingested_at.to_rfc3339()),
        ];

        let mut edges = vec![EdgeUpsert::new(
            EdgeType::HasAnnotation,
            patient,
            annotation.clone(),
        )];
        edges.extend(self.targets.iter().map(|(target, column)| {
            EdgeUpsert::new(EdgeType::Annotates, annotation.clone(), target.clone())
                .with("column", column)
        }));

        (nodes, edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_map_edge_upsert() {
        let edge: EdgeUpsert = CrossMapEdge {
            icd10: "Q87.4".to_string(),
            hpo: "HP:0001166".to_string(),
            cuis: vec!["C0024796".to_string()],
        }
        .into();

        assert_eq!(edge.edge_type, EdgeType::UmlsCrossMap);
        assert_eq!(edge.from.label, NodeLabel::IcdDisease);
        assert_eq!(edge.to.id, "HP:0001166");
        assert_eq!(edge.properties["cuis"], serde_json::json!(["C0024796"]));
    }

    #[test]
    fn test_patient_annotation_upserts() {
        let annotation = PatientAnnotation {
            patient_id: "P-17".to_string(),
            batch_id: "ab12".to_string(),
            source: "patients.csv".to_string(),
            line: 4,
            ingested_at: Utc::now(),
            targets: vec![
                (
                    NodeKey::new(NodeLabel::IcdDisease, "A00"),
                    "ICD10_Codes".to_string(),
                ),
                (
                    NodeKey::new(NodeLabel::IcdDisease, "B01"),
                    "ICD10_Codes".to_string(),
                ),
            ],
        };

        let (nodes, edges) = annotation.to_upserts();
        assert_eq!(annotation.id(), "ab12:4");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].properties["line"], 4);
        assert!(!nodes[1].properties.contains_key("ingested_at"));
        assert!(nodes[1].on_create.contains_key("ingested_at"));
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].edge_type, EdgeType::HasAnnotation);
        assert!(edges[1..]
            .iter()
            .all(|e| e.edge_type == EdgeType::Annotates && e.from.id == "ab12:4"));
    }

    #[test]
    fn test_ontology_node_parent_candidates() {
        let node = OntologyNode {
            key: NodeKey::new(NodeLabel::IcdDisease, "A01.2"),
            label: "Paratyphoid fever B".to_string(),
            ontology: Ontology::Icd10,
            parent_refs: vec!["A01".to_string(), "range:A01.2".to_string()],
            parent: None,
            embedded: false,
            chapter_refs: Vec::new(),
            chapter_parent: None,
            umls_ids: Vec::new(),
        };
        assert_eq!(
            node.parent_candidates(),
            vec![
                ParentRef::Code("A01".to_string()),
                ParentRef::Range("A01.2".to_string())
            ]
        );
    }
}
