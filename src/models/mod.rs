//! Domain models: graph vocabulary, node and edge writes, run reports.

mod node;
mod ontology;
mod report;

pub use node::{
    CrossMapEdge, EdgeUpsert, HierarchyEdge, NodeKey, NodeUpsert, OntologyNode,
    PatientAnnotation, Properties,
};
pub use ontology::{EdgeType, NodeLabel, Ontology};
pub use report::{RunReport, SourceReport, Warning};
