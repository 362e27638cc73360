use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::context::{AppStore, Context};
use crate::di::FromContext;
use crate::error::AppError;
use crate::loader::Loader;
use crate::models::{Ontology, RunReport, SourceReport};
use crate::patients::read_patients;

use super::{load_nodes, skipped_warnings};

#[derive(FromContext, Clone)]
pub struct PatientService {
    store: AppStore,
    config: Arc<Config>,
}

impl PatientService {
    /// Ingests one patient annotation file as a single batch.
    ///
    /// Re-ingesting an unchanged file reuses the same annotations and keeps
    /// their original `ingested_at`.
    pub async fn ingest(&self, path: &Path) -> RunReport {
        let mut report = RunReport::new();
        let mut source = SourceReport::new(super::source_name(path), "patients");
        match self.load(path, &mut source, &mut report).await {
            Ok(()) => report.add_source(source),
            Err(e) => report.fail(source, &e),
        }
        report
    }

    async fn load(
        &self,
        path: &Path,
        source: &mut SourceReport,
        report: &mut RunReport,
    ) -> Result<(), AppError> {
        let schema = &self.config.patients;
        let mut labels = Vec::new();
        for column in &schema.code_columns {
            let label = column.ontology.concept_label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        if labels.is_empty() {
            labels.push(Ontology::Icd10.concept_label());
        }
        let (index, _) = load_nodes(self.store.as_ref(), &labels).await?;

        let batch = read_patients(path, schema, self.config.import.on_error, &index, Utc::now())?;
        source.source = batch.source.clone();
        source.records = batch.records;
        source.skipped_lines = batch.skipped.iter().map(|s| s.line).collect();
        report
            .warnings
            .extend(skipped_warnings(&batch.source, &batch.skipped));
        if !batch.warnings.is_empty() {
            tracing::warn!(
                source = %batch.source,
                unresolved = batch.warnings.len(),
                "Patient codes not found among loaded nodes"
            );
        }
        report.warnings.extend(batch.warnings);

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for annotation in &batch.annotations {
            let (n, e) = annotation.to_upserts();
            nodes.extend(n);
            edges.extend(e);
        }

        let loader = Loader::new(self.store.as_ref(), self.config.import.batch_size);
        let stats = loader.load(&batch.source, &nodes, &edges).await?;
        source.nodes = stats.nodes;
        source.edges = stats.edges;
        Ok(())
    }
}
