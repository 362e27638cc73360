//! The full two-pass pipeline and graph statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::context::{AppStore, Context};
use crate::di::FromContext;
use crate::embedding::EmbedTarget;
use crate::error::AppError;
use crate::models::{EdgeType, NodeLabel, Ontology, RunReport, SourceReport};
use crate::store::NodeQuery;

use super::{EmbeddingService, ImportKind, ImportService, MappingService, PatientService};

/// Input files of one pipeline run. Missing files are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    pub chapters: Option<PathBuf>,
    pub groups: Option<PathBuf>,
    pub codes: Option<PathBuf>,
    pub hpo: Option<PathBuf>,
    pub umls: Option<PathBuf>,
    pub patients: Vec<PathBuf>,
    pub embed: bool,
}

impl RunPlan {
    fn ontology_files(&self) -> Vec<(ImportKind, &PathBuf)> {
        [
            (ImportKind::Icd10Chapters, &self.chapters),
            (ImportKind::Icd10Groups, &self.groups),
            (ImportKind::Icd10Codes, &self.codes),
            (ImportKind::Hpo, &self.hpo),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.as_ref().map(|path| (kind, path)))
        .collect()
    }
}

/// Node and edge counts plus the work still left to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: BTreeMap<NodeLabel, usize>,
    pub edges: BTreeMap<EdgeType, usize>,
    /// Nodes with parent candidates but no parent yet.
    pub unlinked: usize,
    pub missing_embedding: usize,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nodes:")?;
        for label in NodeLabel::ALL {
            writeln!(f, "  {:<20} {}", label.as_str(), self.nodes.get(&label).unwrap_or(&0))?;
        }
        writeln!(f, "edges:")?;
        for edge_type in EdgeType::ALL {
            writeln!(
                f,
                "  {:<20} {}",
                edge_type.as_str(),
                self.edges.get(&edge_type).unwrap_or(&0)
            )?;
        }
        writeln!(f, "unlinked: {}", self.unlinked)?;
        write!(f, "missing embedding: {}", self.missing_embedding)
    }
}

#[derive(FromContext, Clone)]
pub struct PipelineService {
    store: AppStore,
    config: Arc<Config>,
    import: ImportService,
    mapping: MappingService,
    patients: PatientService,
    embedding: EmbeddingService,
}

impl PipelineService {
    /// Creates the graph schema, identity indexes and vector indexes.
    pub async fn init(&self) -> Result<(), AppError> {
        self.store
            .ensure_schema(self.config.embedding.dimensions)
            .await?;
        tracing::info!(backend = self.store.backend_name(), "Schema ready");
        Ok(())
    }

    /// Runs every stage of `plan`.
    ///
    /// Pass one writes the nodes of every ontology file; pass two links
    /// hierarchies once all parents can exist. A failed file does not stop
    /// the files after it.
    pub async fn run(&self, plan: &RunPlan) -> RunReport {
        let mut report = RunReport::new();
        if let Err(e) = self.init().await {
            tracing::error!("Schema setup failed: {}", e);
            report.fail(SourceReport::new("schema", "init"), &e);
            return report;
        }

        let files = plan.ontology_files();
        for (kind, path) in &files {
            self.import.import_nodes(*kind, path, &mut report).await;
        }

        for ontology in [Ontology::Icd10, Ontology::Hpo] {
            if files.iter().any(|(kind, _)| kind.ontology() == ontology) {
                self.import.relink(ontology, &mut report).await;
            }
        }

        if let Some(umls) = &plan.umls {
            report.merge(self.mapping.map_umls(umls).await);
        }

        for path in &plan.patients {
            report.merge(self.patients.ingest(path).await);
        }

        if plan.embed {
            report.merge(self.embedding.embed(EmbedTarget::All, false).await);
        }

        tracing::info!(
            nodes = report.nodes_loaded(),
            edges = report.edges_loaded(),
            warnings = report.warnings.len(),
            "Pipeline finished"
        );
        report
    }

    pub async fn stats(&self) -> Result<GraphStats, AppError> {
        let mut stats = GraphStats {
            nodes: self.store.count_nodes().await?,
            edges: self.store.count_edges().await?,
            ..GraphStats::default()
        };

        for label in NodeLabel::ALL.into_iter().filter(|l| l.ontology().is_some()) {
            stats.unlinked += self
                .store
                .fetch_nodes(&NodeQuery::all(label).unlinked())
                .await?
                .len();
        }
        for label in NodeLabel::EMBEDDABLE {
            stats.missing_embedding += self
                .store
                .fetch_nodes(&NodeQuery::all(label).missing_embedding())
                .await?
                .len();
        }
        Ok(stats)
    }
}
