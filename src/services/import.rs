//! Ontology file import (pass one) and hierarchy resolution (pass two).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::context::{AppStore, Context};
use crate::di::FromContext;
use crate::error::AppError;
use crate::hierarchy::{
    CodeRange, HierarchyBuilder, HierarchyRules, NodeIndex, ParentRef, ParentRule,
};
use crate::loader::Loader;
use crate::models::{
    EdgeUpsert, HierarchyEdge, NodeKey, NodeLabel, NodeUpsert, Ontology, OntologyNode, RunReport,
    SourceReport, Warning,
};
use crate::parser::{ErrorPolicy, Record, RecordReader, RecordSchema, SchemaSet, SkippedLine};

use super::{load_nodes, skipped_warnings};

/// The ontology files the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ImportKind {
    Icd10Chapters,
    Icd10Groups,
    Icd10Codes,
    Hpo,
}

impl ImportKind {
    pub fn name(self) -> &'static str {
        match self {
            ImportKind::Icd10Chapters => "icd10-chapters",
            ImportKind::Icd10Groups => "icd10-groups",
            ImportKind::Icd10Codes => "icd10-codes",
            ImportKind::Hpo => "hpo",
        }
    }

    pub fn label(self) -> NodeLabel {
        match self {
            ImportKind::Icd10Chapters => NodeLabel::IcdChapter,
            ImportKind::Icd10Groups => NodeLabel::IcdGroup,
            ImportKind::Icd10Codes => NodeLabel::IcdDisease,
            ImportKind::Hpo => NodeLabel::HpoPhenotype,
        }
    }

    pub fn ontology(self) -> Ontology {
        match self {
            ImportKind::Hpo => Ontology::Hpo,
            _ => Ontology::Icd10,
        }
    }

    fn schema(self, schemas: &SchemaSet) -> &RecordSchema {
        match self {
            ImportKind::Icd10Chapters => &schemas.icd10_chapters,
            ImportKind::Icd10Groups => &schemas.icd10_groups,
            ImportKind::Icd10Codes => &schemas.icd10_codes,
            ImportKind::Hpo => &schemas.hpo,
        }
    }

    fn rule(self, rules: &HierarchyRules) -> &ParentRule {
        match self {
            ImportKind::Icd10Chapters => &rules.icd10_chapters,
            ImportKind::Icd10Groups => &rules.icd10_groups,
            ImportKind::Icd10Codes => &rules.icd10_codes,
            ImportKind::Hpo => &rules.hpo,
        }
    }

    /// Chapter-level rule, kept apart so a code can have both a block and a chapter.
    fn chapter_rule(self, rules: &HierarchyRules) -> Option<&ParentRule> {
        match self {
            ImportKind::Icd10Codes => Some(&rules.icd10_code_chapters),
            _ => None,
        }
    }

    /// Node id of a record. Groups without an `id` field are named by their bounds.
    fn node_id(self, record: &Record) -> Option<String> {
        match self {
            ImportKind::Icd10Groups => record.get("id").map(str::to_string).or_else(|| {
                Some(CodeRange::id_from_bounds(
                    record.get("start")?,
                    record.get("end")?,
                ))
            }),
            ImportKind::Icd10Codes => record
                .get("code")
                .or_else(|| record.get("id"))
                .map(str::to_string),
            _ => record.get("id").map(str::to_string),
        }
    }

    fn node(
        self,
        id: &str,
        record: &Record,
        parents: &[ParentRef],
        chapters: Option<&[ParentRef]>,
    ) -> NodeUpsert {
        let mut node = NodeUpsert::new(self.label(), id)
            .with("label", record.get_or_empty("label"))
            .with("ontology", self.ontology().tag())
            .with("parent_refs", refs(parents));
        if let Some(chapters) = chapters {
            node = node.with("chapter_refs", refs(chapters));
        }

        let extra: &[&str] = match self {
            ImportKind::Icd10Groups => &["chapter"],
            // `group` is the first category of the block, as written in the file
            ImportKind::Icd10Codes => &["chapter", "group"],
            _ => &[],
        };
        for field in extra {
            if let Some(value) = record.get(field) {
                node = node.with(field, value);
            }
        }
        node
    }
}

fn refs(candidates: &[ParentRef]) -> Vec<String> {
    candidates.iter().map(ToString::to_string).collect()
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Nodes read from one ontology file.
#[derive(Debug, Default)]
pub(crate) struct ParsedFile {
    pub source: String,
    pub records: usize,
    pub nodes: Vec<NodeUpsert>,
    pub skipped: Vec<SkippedLine>,
    pub warnings: Vec<Warning>,
}

/// Reads `path` into node upserts carrying their parent candidates.
///
/// A repeated id keeps its first line; a repeat with other parents is a
/// hierarchy conflict.
pub(crate) fn parse_nodes(
    kind: ImportKind,
    path: &Path,
    schemas: &SchemaSet,
    rules: &HierarchyRules,
    policy: ErrorPolicy,
) -> Result<ParsedFile, AppError> {
    let mut reader = RecordReader::open(path, kind.schema(schemas).clone(), policy)?;
    let mut parsed = ParsedFile {
        source: reader.source_name().to_string(),
        ..Default::default()
    };
    let rule = kind.rule(rules);
    let mut builder = HierarchyBuilder::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut missing_id = Vec::new();

    for record in reader.by_ref() {
        let record = record?;
        parsed.records += 1;

        let Some(id) = kind.node_id(&record) else {
            let reason = "no node id".to_string();
            if policy == ErrorPolicy::Abort {
                return Err(AppError::Parse {
                    source_name: parsed.source,
                    line: record.line,
                    message: reason,
                });
            }
            tracing::warn!(source = %parsed.source, line = record.line, "Skipping line: {}", reason);
            missing_id.push(SkippedLine {
                line: record.line,
                reason,
            });
            continue;
        };

        let candidates = rule.candidates(&id, &record);
        let chapters = kind
            .chapter_rule(rules)
            .map(|rule| rule.candidates(&id, &record));
        let node = kind.node(&id, &record, &candidates, chapters.as_deref());
        let first = seen.insert(id);
        builder.add(node.key.clone(), candidates);
        if first {
            parsed.nodes.push(node);
        }
    }

    let mut skipped = reader.into_skipped();
    skipped.extend(missing_id);
    skipped.sort_by_key(|s| s.line);
    parsed.skipped = skipped;
    parsed.warnings = builder.take_warnings();

    tracing::info!(
        source = %parsed.source,
        kind = kind.name(),
        records = parsed.records,
        nodes = parsed.nodes.len(),
        skipped = parsed.skipped.len(),
        "Parsed ontology file"
    );
    Ok(parsed)
}

/// Imports ontology files and links their hierarchies.
#[derive(FromContext, Clone)]
pub struct ImportService {
    store: AppStore,
    config: Arc<Config>,
}

impl ImportService {
    /// Imports one file and resolves every hierarchy edge of its ontology
    /// whose parent is now loaded.
    pub async fn import(&self, kind: ImportKind, path: &Path) -> RunReport {
        let mut report = RunReport::new();
        if self.import_nodes(kind, path, &mut report).await {
            self.relink(kind.ontology(), &mut report).await;
        }
        report
    }

    /// Pass one: writes the file's nodes. Returns `false` when the file failed.
    pub async fn import_nodes(&self, kind: ImportKind, path: &Path, report: &mut RunReport) -> bool {
        let mut source = SourceReport::new(super::source_name(path), kind.name());

        let result = self.load_file(kind, path, &mut source, report).await;
        match result {
            Ok(()) => {
                report.add_source(source);
                true
            }
            Err(e) => {
                report.fail(source, &e);
                false
            }
        }
    }

    async fn load_file(
        &self,
        kind: ImportKind,
        path: &Path,
        source: &mut SourceReport,
        report: &mut RunReport,
    ) -> Result<(), AppError> {
        let config = &self.config;
        let parsed = parse_nodes(
            kind,
            path,
            &config.schemas,
            &config.hierarchy,
            config.import.on_error,
        )?;
        source.source = parsed.source.clone();
        source.records = parsed.records;
        source.skipped_lines = parsed.skipped.iter().map(|s| s.line).collect();
        report
            .warnings
            .extend(skipped_warnings(&parsed.source, &parsed.skipped));
        report.extend_warnings(parsed.warnings);

        let loader = Loader::new(self.store.as_ref(), config.import.batch_size);
        let stats = loader.load_nodes(&parsed.source, &parsed.nodes).await?;
        source.nodes = stats.nodes;
        Ok(())
    }

    /// Pass two: links every unlinked node of `ontology` whose parent exists.
    /// Children still without a parent are reported as dangling.
    pub async fn relink(&self, ontology: Ontology, report: &mut RunReport) {
        let mut source = SourceReport::new(format!("{} hierarchy", ontology), "relink");
        match self.link(ontology, &mut source, report).await {
            Ok(()) => report.add_source(source),
            Err(e) => report.fail(source, &e),
        }
    }

    async fn link(
        &self,
        ontology: Ontology,
        source: &mut SourceReport,
        report: &mut RunReport,
    ) -> Result<(), AppError> {
        let (index, nodes) = load_nodes(self.store.as_ref(), ontology.labels()).await?;

        let mut builder = HierarchyBuilder::new();
        for node in &nodes {
            match &node.parent {
                Some(parent) => {
                    if let Some(parent) =
                        index.resolve(&ParentRef::Code(parent.clone()), node.key.label)
                    {
                        builder.link_existing(node.key.clone(), parent);
                    }
                }
                None => {
                    builder.add(node.key.clone(), node.parent_candidates());
                }
            }
        }
        let mut chapters = chapter_builder(&nodes);
        source.records = builder.pending() + chapters.pending();

        let edges = builder.resolve(&index);
        report.extend_warnings(builder.finish());

        let chapter_index: NodeIndex = nodes
            .iter()
            .filter(|node| node.key.label == NodeLabel::IcdChapter)
            .map(|node| &node.key)
            .collect();
        let chapter_edges = chapters.resolve(&chapter_index);
        report.extend_warnings(chapters.finish());

        // Parent markers go after the edges: a failed edge batch leaves the
        // child unlinked and the next run retries it.
        let mut markers = link_markers(&edges, "parent");
        markers.extend(link_markers(&chapter_edges, "chapter_parent"));
        let edges: Vec<EdgeUpsert> = edges
            .into_iter()
            .chain(chapter_edges)
            .map(Into::into)
            .collect();

        let loader = Loader::new(self.store.as_ref(), self.config.import.batch_size);
        let written = loader.load_edges(&source.source, &edges).await?;
        loader.load_nodes(&source.source, &markers).await?;
        source.edges = written.edges;

        tracing::info!(%ontology, linked = written.edges, "Hierarchy resolved");
        Ok(())
    }
}

/// Chapter level of the ICD10 hierarchy, one chapter per code.
fn chapter_builder(nodes: &[OntologyNode]) -> HierarchyBuilder {
    let mut builder = HierarchyBuilder::new();
    for node in nodes.iter().filter(|n| n.key.label == NodeLabel::IcdDisease) {
        match &node.chapter_parent {
            Some(chapter) => builder.link_existing(
                node.key.clone(),
                NodeKey::new(NodeLabel::IcdChapter, chapter.as_str()),
            ),
            None => {
                builder.add(node.key.clone(), node.chapter_candidates());
            }
        }
    }
    builder
}

fn link_markers(edges: &[HierarchyEdge], property: &str) -> Vec<NodeUpsert> {
    edges
        .iter()
        .map(|edge| {
            NodeUpsert::new(edge.child.label, edge.child.id.as_str())
                .with(property, &edge.parent.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::parser::FieldSpec;

    fn write(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn parse(kind: ImportKind, text: &str, policy: ErrorPolicy) -> Result<ParsedFile, AppError> {
        let file = write(text);
        parse_nodes(
            kind,
            file.path(),
            &SchemaSet::default(),
            &HierarchyRules::default(),
            policy,
        )
    }

    #[test]
    fn test_groups_are_named_by_range() {
        let parsed = parse(
            ImportKind::Icd10Groups,
            "A00;A09;01;Intestinal infectious diseases\nA15;A19;01;Tuberculosis\n",
            ErrorPolicy::Abort,
        )
        .unwrap();

        let node = &parsed.nodes[0];
        assert_eq!(node.id(), "A00-A09");
        assert_eq!(node.properties["chapter"], "01");
        assert_eq!(node.properties["ontology"], "ICD10");
        assert_eq!(node.properties["parent_refs"], serde_json::json!(["01"]));
        assert!(!node.properties.contains_key("chapter_refs"));
    }

    #[test]
    fn test_codes_carry_parent_candidates() {
        let parsed = parse(
            ImportKind::Icd10Codes,
            "3;N;X;01;A00;A00.-;A00;A00;Cholera;Cholera;;;\n\
             4;T;X;01;A00;A00.0;A00.0;A000;Cholera due to Vibrio cholerae;Cholera;;;\n",
            ErrorPolicy::Abort,
        )
        .unwrap();

        assert_eq!(
            parsed.nodes[0].properties["parent_refs"],
            serde_json::json!(["range:A00"])
        );
        assert_eq!(
            parsed.nodes[1].properties["parent_refs"],
            serde_json::json!(["A00", "range:A00.0"])
        );
        assert_eq!(parsed.nodes[1].properties["group"], "A00");
        assert_eq!(
            parsed.nodes[1].properties["chapter_refs"],
            serde_json::json!(["01"])
        );
    }

    #[test]
    fn test_duplicate_id_with_other_parent_is_a_conflict() {
        let parsed = parse(
            ImportKind::Hpo,
            "HP:0000002\tAbnormality of body height\tHP:0000001\n\
             HP:0000002\tAbnormality of body height\tHP:0000118\n",
            ErrorPolicy::Abort,
        )
        .unwrap();

        assert_eq!(parsed.nodes.len(), 1);
        assert_eq!(
            parsed.nodes[0].properties["parent_refs"],
            serde_json::json!(["HP:0000001"])
        );
        assert!(matches!(
            &parsed.warnings[..],
            [Warning::HierarchyConflict { .. }]
        ));
    }

    #[test]
    fn test_skip_policy_reports_line() {
        let parsed = parse(
            ImportKind::Icd10Chapters,
            "01;Certain infectious and parasitic diseases\nbroken\n02;Neoplasms\n",
            ErrorPolicy::Skip,
        )
        .unwrap();
        assert_eq!(parsed.nodes.len(), 2);
        assert_eq!(parsed.skipped[0].line, 2);

        let err = parse(
            ImportKind::Icd10Chapters,
            "01;Certain infectious and parasitic diseases\nbroken\n",
            ErrorPolicy::Abort,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_custom_parent_column_schema() {
        let mut schemas = SchemaSet::default();
        schemas.icd10_codes = RecordSchema::delimited(
            "codes",
            ';',
            vec![
                FieldSpec::at("code", 0).required(),
                FieldSpec::at("parent", 1),
                FieldSpec::at("label", 2).required(),
            ],
        );
        let rules = HierarchyRules {
            icd10_codes: ParentRule::column("parent"),
            ..HierarchyRules::default()
        };
        let file = write("A00;A00-A09;Cholera\n");

        let parsed = parse_nodes(
            ImportKind::Icd10Codes,
            file.path(),
            &schemas,
            &rules,
            ErrorPolicy::Abort,
        )
        .unwrap();
        assert_eq!(parsed.nodes[0].id(), "A00");
        assert_eq!(
            parsed.nodes[0].properties["parent_refs"],
            serde_json::json!(["A00-A09"])
        );
    }
}
