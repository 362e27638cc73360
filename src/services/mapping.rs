//! UMLS concept mapping between loaded ICD10 and HPO nodes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::context::{AppStore, Context};
use crate::di::FromContext;
use crate::error::AppError;
use crate::loader::Loader;
use crate::mapping::{ConceptIndex, UmlsRow};
use crate::models::{EdgeUpsert, NodeLabel, NodeUpsert, RunReport, SourceReport, Warning};
use crate::parser::RecordReader;

use super::{load_nodes, skipped_warnings};

const MAPPED_LABELS: [NodeLabel; 2] = [NodeLabel::IcdDisease, NodeLabel::HpoPhenotype];

#[derive(FromContext, Clone)]
pub struct MappingService {
    store: AppStore,
    config: Arc<Config>,
}

impl MappingService {
    /// Reads a UMLS concept file, tags mapped nodes with their concept ids
    /// and writes one `UMLS_CROSS_MAP` edge per ICD10/HPO pair.
    ///
    /// Must run after both ontologies are imported.
    pub async fn map_umls(&self, path: &Path) -> RunReport {
        let mut report = RunReport::new();
        let mut source = SourceReport::new(super::source_name(path), "umls");
        match self.map(path, &mut source, &mut report).await {
            Ok(()) => report.add_source(source),
            Err(e) => report.fail(source, &e),
        }
        report
    }

    async fn map(
        &self,
        path: &Path,
        source: &mut SourceReport,
        report: &mut RunReport,
    ) -> Result<(), AppError> {
        let (index, existing) = load_nodes(self.store.as_ref(), &MAPPED_LABELS).await?;

        let mut reader = RecordReader::open(
            path,
            self.config.schemas.umls.clone(),
            self.config.import.on_error,
        )?;
        source.source = reader.source_name().to_string();

        let mut concepts = ConceptIndex::new();
        for record in reader.by_ref() {
            let record = record?;
            concepts.add(UmlsRow::from_record(&record), &self.config.umls, &index);
        }
        source.records = concepts.rows();

        let skipped = reader.into_skipped();
        source.skipped_lines = skipped.iter().map(|s| s.line).collect();
        report
            .warnings
            .extend(skipped_warnings(&source.source, &skipped));

        let unresolved = concepts.unresolved();
        if !unresolved.is_empty() {
            tracing::warn!(
                source = %source.source,
                unresolved = unresolved.len(),
                "UMLS rows reference codes that are not loaded"
            );
        }
        report
            .warnings
            .extend(unresolved.iter().map(|row| Warning::UnresolvedCode {
                source: source.source.clone(),
                line: row.line,
                code: format!("{}:{}", row.sab, row.code),
            }));

        // Concept ids accumulate across files.
        let stored: HashMap<_, _> = existing
            .iter()
            .map(|node| (&node.key, &node.umls_ids))
            .collect();
        let nodes: Vec<NodeUpsert> = concepts
            .concepts_by_node()
            .into_iter()
            .map(|(key, cuis)| {
                let mut ids: BTreeSet<String> = cuis.into_iter().collect();
                if let Some(previous) = stored.get(&key) {
                    ids.extend(previous.iter().cloned());
                }
                let ids: Vec<String> = ids.into_iter().collect();
                NodeUpsert::new(key.label, key.id).with("umls_ids", ids)
            })
            .collect();
        let edges: Vec<EdgeUpsert> = concepts.cross_map().into_iter().map(Into::into).collect();

        tracing::info!(
            source = %source.source,
            rows = concepts.rows(),
            ignored = concepts.ignored(),
            pairs = edges.len(),
            "Concept index built"
        );

        let loader = Loader::new(self.store.as_ref(), self.config.import.batch_size);
        let stats = loader.load(&source.source, &nodes, &edges).await?;
        source.nodes = stats.nodes;
        source.edges = stats.edges;
        Ok(())
    }
}
