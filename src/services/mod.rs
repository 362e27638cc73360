//! Pipeline operations, one service per command family.
//!
//! Services resolve their dependencies from the [`Context`](crate::context::Context)
//! with the `FromContext` derive. Each operation returns a
//! [`RunReport`](crate::models::RunReport); fatal errors of one source are
//! recorded there and do not stop the other sources.

mod embedding;
mod import;
mod mapping;
mod patients;
mod pipeline;

pub use embedding::EmbeddingService;
pub use import::{ImportKind, ImportService};
pub use mapping::MappingService;
pub use patients::PatientService;
pub use pipeline::{GraphStats, PipelineService, RunPlan};

use std::path::Path;

use crate::error::AppError;
use crate::hierarchy::NodeIndex;
use crate::models::{NodeLabel, OntologyNode, Warning};
use crate::parser::SkippedLine;
use crate::store::{GraphStore, NodeQuery};

/// Every node of `labels`, plus an index over their keys.
pub(crate) async fn load_nodes(
    store: &dyn GraphStore,
    labels: &[NodeLabel],
) -> Result<(NodeIndex, Vec<OntologyNode>), AppError> {
    let mut nodes = Vec::new();
    for label in labels {
        nodes.extend(store.fetch_nodes(&NodeQuery::all(*label)).await?);
    }
    let index: NodeIndex = nodes.iter().map(|node| &node.key).collect();
    Ok((index, nodes))
}

pub(crate) fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Skip reports as warnings. The reader already logged each line.
pub(crate) fn skipped_warnings(source: &str, skipped: &[SkippedLine]) -> Vec<Warning> {
    skipped
        .iter()
        .map(|s| Warning::SkippedLine {
            source: source.to_string(),
            line: s.line,
            reason: s.reason.clone(),
        })
        .collect()
}
