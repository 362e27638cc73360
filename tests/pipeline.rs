//! End-to-end pipeline runs against the in-memory store.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use ontolink::config::Config;
use ontolink::context::Context;
use ontolink::embedding::{EmbedError, EmbeddingProvider};
use ontolink::hierarchy::ParentRule;
use ontolink::models::{EdgeType, NodeKey, NodeLabel, Warning};
use ontolink::parser::{ErrorPolicy, FieldSpec, RecordSchema};
use ontolink::services::{
    ImportKind, ImportService, MappingService, PatientService, PipelineService, RunPlan,
};
use ontolink::store::{GraphStore, MemoryStore, NodeQuery};

const CHAPTERS: &str = "01;Certain infectious and parasitic diseases\n02;Neoplasms\n";

const GROUPS: &str = "A00;A09;01;Intestinal infectious diseases\n\
C00;C14;02;Malignant neoplasms of lip, oral cavity and pharynx\n";

const CODES: &str = "3;N;X;01;A00;A00.-;A00;A00;Cholera;Cholera;;;\n\
4;T;X;01;A00;A00.0;A00.0;A000;Cholera due to Vibrio cholerae 01, biovar cholerae;Cholera;;;\n\
4;T;X;01;A00;A00.1;A00.1;A001;Cholera due to Vibrio cholerae 01, biovar eltor;Cholera;;;\n\
3;N;X;02;C00;C00.-;C00;C00;Malignant neoplasm of lip;Malignant neoplasm of lip;;;\n";

const HPO: &str = "#id\tlabel\tparent\n\
HP:0000001\tAll\t\n\
HP:0000118\tPhenotypic abnormality\tHP:0000001\n\
HP:0001250\tSeizure\tHP:0000118\n";

const PATIENTS: &str = "PatientID,ICD10_Codes\n\
P1,\"['A00', 'A00.1']\"\n\
P2,\"['C00', 'Z99']\"\n";

fn umls_row(cui: &str, sab: &str, code: &str, text: &str) -> String {
    format!("{cui}|ENG|P|L0000001|PF|S0000001|Y|A0000001||||{sab}|PT|{code}|{text}|0|N||\n")
}

fn umls() -> String {
    [
        umls_row("C0008049", "ICD10", "A00", "Cholera"),
        umls_row("C0008049", "HPO", "HP:0001250", "Seizure"),
        umls_row("C0008049", "ICD10CM", "A00", "Cholera"),
        umls_row("C0036572", "ICD10", "A00", "Cholera"),
        umls_row("C0036572", "HPO", "HP:0001250", "Seizures"),
        umls_row("C0036572", "MSH", "D012640", "Seizures"),
        umls_row("C0000001", "HPO", "HP:9999999", "Unknown"),
    ]
    .concat()
}

fn file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

/// Answers every label except "Seizure", which always times out.
struct StubEmbedder;

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn dimensions(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text == "Seizure" {
            Err(EmbedError::Timeout)
        } else {
            Ok(vec![text.len() as f32, 0.5, 1.0])
        }
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.embedding.dimensions = 3;
    config.embedding.base_delay_ms = 1;
    config.import.batch_size = 2;
    config
}

fn context(store: &Arc<MemoryStore>, config: Config) -> Context {
    Context::new(store.clone(), config, Arc::new(StubEmbedder))
}

struct Fixtures {
    chapters: NamedTempFile,
    groups: NamedTempFile,
    codes: NamedTempFile,
    hpo: NamedTempFile,
    umls: NamedTempFile,
    patients: NamedTempFile,
}

impl Fixtures {
    fn new() -> Self {
        Self {
            chapters: file(CHAPTERS),
            groups: file(GROUPS),
            codes: file(CODES),
            hpo: file(HPO),
            umls: file(&umls()),
            patients: file(PATIENTS),
        }
    }

    fn plan(&self) -> RunPlan {
        RunPlan {
            chapters: Some(self.chapters.path().to_path_buf()),
            groups: Some(self.groups.path().to_path_buf()),
            codes: Some(self.codes.path().to_path_buf()),
            hpo: Some(self.hpo.path().to_path_buf()),
            umls: Some(self.umls.path().to_path_buf()),
            patients: vec![self.patients.path().to_path_buf()],
            embed: true,
        }
    }
}

fn disease(id: &str) -> NodeKey {
    NodeKey::new(NodeLabel::IcdDisease, id)
}

#[tokio::test]
async fn test_full_run_builds_graph() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config());
    let fixtures = Fixtures::new();
    let pipeline = ctx.resolve::<PipelineService>();

    let report = pipeline.run(&fixtures.plan()).await;
    assert!(!report.has_errors(), "{}", report);
    assert_eq!(report.exit_code(), 0);

    let nodes = store.count_nodes().await.unwrap();
    assert_eq!(nodes[&NodeLabel::IcdChapter], 2);
    assert_eq!(nodes[&NodeLabel::IcdGroup], 2);
    assert_eq!(nodes[&NodeLabel::IcdDisease], 4);
    assert_eq!(nodes[&NodeLabel::HpoPhenotype], 3);
    assert_eq!(nodes[&NodeLabel::Patient], 2);
    assert_eq!(nodes[&NodeLabel::PatientAnnotation], 2);

    let edges = store.count_edges().await.unwrap();
    assert_eq!(edges[&EdgeType::ChapterHasGroup], 2);
    assert_eq!(edges[&EdgeType::GroupHasDisease], 2);
    assert_eq!(edges[&EdgeType::ChapterHasDisease], 4);
    assert_eq!(edges[&EdgeType::HasChild], 4);
    assert_eq!(edges[&EdgeType::UmlsCrossMap], 1);
    assert_eq!(edges[&EdgeType::HasAnnotation], 2);
    assert_eq!(edges[&EdgeType::Annotates], 3);

    assert!(store
        .edge(
            EdgeType::GroupHasDisease,
            &NodeKey::new(NodeLabel::IcdGroup, "A00-A09"),
            &disease("A00"),
        )
        .is_some());
    assert!(store
        .edge(EdgeType::HasChild, &disease("A00"), &disease("A00.1"))
        .is_some());
    assert!(store
        .edge(
            EdgeType::ChapterHasDisease,
            &NodeKey::new(NodeLabel::IcdChapter, "02"),
            &disease("C00"),
        )
        .is_some());

    // one edge per pair, whatever the number of rows and vocabularies
    let cross = store
        .edge(
            EdgeType::UmlsCrossMap,
            &disease("A00"),
            &NodeKey::new(NodeLabel::HpoPhenotype, "HP:0001250"),
        )
        .unwrap();
    assert_eq!(cross["cuis"], serde_json::json!(["C0008049", "C0036572"]));
    let cholera = store.node(&disease("A00")).unwrap();
    assert_eq!(cholera["umls_ids"], serde_json::json!(["C0008049", "C0036572"]));

    let unresolved: Vec<&str> = report
        .warnings
        .iter()
        .filter_map(|w| match w {
            Warning::UnresolvedCode { code, .. } => Some(code.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(unresolved.len(), 2);
    assert!(unresolved.contains(&"Z99"));
    assert!(unresolved.contains(&"HPO:HP:9999999"));
    assert!(!report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::DanglingReference { .. })));

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.unlinked, 0);
    assert_eq!(stats.missing_embedding, 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config());
    let fixtures = Fixtures::new();
    let pipeline = ctx.resolve::<PipelineService>();

    pipeline.run(&fixtures.plan()).await;
    let nodes = store.count_nodes().await.unwrap();
    let edges = store.count_edges().await.unwrap();

    let again = pipeline.run(&fixtures.plan()).await;
    assert!(!again.has_errors(), "{}", again);
    assert_eq!(store.count_nodes().await.unwrap(), nodes);
    assert_eq!(store.count_edges().await.unwrap(), edges);
}

#[tokio::test]
async fn test_exhausted_embedding_is_a_warning() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config());
    let fixtures = Fixtures::new();

    let report = ctx
        .resolve::<PipelineService>()
        .run(&fixtures.plan())
        .await;

    assert_eq!(report.embedded, 6);
    assert_eq!(report.exit_code(), 0);
    assert!(report.warnings.contains(&Warning::EmbeddingFailed {
        node: "HpoPhenotype:HP:0001250".to_string(),
        attempts: 3,
        message: "request timed out".to_string(),
    }));

    let seizure = store
        .node(&NodeKey::new(NodeLabel::HpoPhenotype, "HP:0001250"))
        .unwrap();
    assert!(!seizure.contains_key("embedding"));
    let cholera = store.node(&disease("A00")).unwrap();
    assert_eq!(cholera["embedding"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_dangling_parent_resolves_when_loaded_later() {
    let mut config = config();
    config.schemas.icd10_codes = RecordSchema::delimited(
        "codes",
        ';',
        vec![
            FieldSpec::at("code", 0).required(),
            FieldSpec::at("parent", 1),
            FieldSpec::at("label", 2).required(),
        ],
    );
    config.hierarchy.icd10_codes = ParentRule::column("parent");

    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config);
    let import = ctx.resolve::<ImportService>();

    let codes = file("A00;A00-A09;Cholera\n");
    let first = import.import(ImportKind::Icd10Codes, codes.path()).await;
    assert!(first.warnings.contains(&Warning::DanglingReference {
        label: "IcdDisease".to_string(),
        child: "A00".to_string(),
        parent: "A00-A09".to_string(),
    }));
    let unlinked = store
        .fetch_nodes(&NodeQuery::all(NodeLabel::IcdDisease).unlinked())
        .await
        .unwrap();
    assert_eq!(unlinked.len(), 1);

    let groups = file("A00;A09;01;Intestinal infectious diseases\n");
    let second = import.import(ImportKind::Icd10Groups, groups.path()).await;
    assert!(!second.has_errors(), "{}", second);

    let group = NodeKey::new(NodeLabel::IcdGroup, "A00-A09");
    assert!(store
        .edge(EdgeType::GroupHasDisease, &group, &disease("A00"))
        .is_some());
    assert_eq!(
        store.node(&disease("A00")).unwrap()["parent"],
        serde_json::json!("A00-A09")
    );
    // the group's own chapter was never loaded
    assert!(!second.warnings.iter().any(|w| matches!(
        w,
        Warning::DanglingReference { child, .. } if child == "A00"
    )));
}

#[tokio::test]
async fn test_skip_policy_reports_malformed_lines() {
    let codes = file(
        "3;N;X;01;A00;A00.-;A00;A00;Cholera;Cholera;;;\n\
         truncated;line\n\
         4;T;X;01;A00;A00.0;A00.0;A000;Cholera due to Vibrio cholerae 01, biovar cholerae;Cholera;;;\n",
    );

    let mut skip = config();
    skip.import.on_error = ErrorPolicy::Skip;
    let store = Arc::new(MemoryStore::new());
    let report = context(&store, skip)
        .resolve::<ImportService>()
        .import(ImportKind::Icd10Codes, codes.path())
        .await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.sources[0].skipped_lines, vec![2]);
    assert_eq!(report.sources[0].nodes, 2);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::SkippedLine { line: 2, .. })));

    let store = Arc::new(MemoryStore::new());
    let report = context(&store, config())
        .resolve::<ImportService>()
        .import(ImportKind::Icd10Codes, codes.path())
        .await;
    assert_eq!(report.exit_code(), 2);
    assert!(store.count_nodes().await.unwrap().values().all(|n| *n == 0));
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped() {
    let mut chapters = NamedTempFile::new().unwrap();
    chapters
        .write_all(b"01;Infections\n02;Neopl\xe4sms\n03;Blood\n")
        .unwrap();

    let mut skip = config();
    skip.import.on_error = ErrorPolicy::Skip;
    let store = Arc::new(MemoryStore::new());
    let report = context(&store, skip)
        .resolve::<ImportService>()
        .import(ImportKind::Icd10Chapters, chapters.path())
        .await;

    assert_eq!(report.exit_code(), 0, "{}", report);
    assert_eq!(report.sources[0].skipped_lines, vec![2]);
    assert_eq!(store.count_nodes().await.unwrap()[&NodeLabel::IcdChapter], 2);
    assert!(store
        .node(&NodeKey::new(NodeLabel::IcdChapter, "03"))
        .is_some());
}

#[tokio::test]
async fn test_reingested_annotations_keep_ingestion_time() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config());
    let fixtures = Fixtures::new();
    let plan = RunPlan {
        patients: Vec::new(),
        umls: None,
        embed: false,
        ..fixtures.plan()
    };
    ctx.resolve::<PipelineService>().run(&plan).await;

    let patients = ctx.resolve::<PatientService>();
    let first = patients.ingest(fixtures.patients.path()).await;
    assert!(!first.has_errors(), "{}", first);
    let annotation_ids = store.node_keys(NodeLabel::PatientAnnotation);
    assert_eq!(annotation_ids.len(), 2);
    let before: Vec<_> = annotation_ids
        .iter()
        .map(|key| store.node(key).unwrap()["ingested_at"].clone())
        .collect();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = patients.ingest(fixtures.patients.path()).await;
    assert!(!second.has_errors(), "{}", second);

    let after: Vec<_> = annotation_ids
        .iter()
        .map(|key| store.node(key).unwrap()["ingested_at"].clone())
        .collect();
    assert_eq!(before, after);
    assert_eq!(
        store.count_nodes().await.unwrap()[&NodeLabel::PatientAnnotation],
        2
    );
}

#[tokio::test]
async fn test_concept_ids_accumulate_across_files() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, config());
    let fixtures = Fixtures::new();
    let plan = RunPlan {
        umls: None,
        patients: Vec::new(),
        embed: false,
        ..fixtures.plan()
    };
    ctx.resolve::<PipelineService>().run(&plan).await;

    let mapping = ctx.resolve::<MappingService>();
    let first = file(&umls_row("C0036572", "ICD10", "A00", "Cholera"));
    let second = file(&umls_row("C0008049", "ICD10", "A00", "Cholera"));
    assert!(!mapping.map_umls(first.path()).await.has_errors());
    assert!(!mapping.map_umls(second.path()).await.has_errors());
    assert!(!mapping.map_umls(second.path()).await.has_errors());

    let cholera = store.node(&disease("A00")).unwrap();
    assert_eq!(cholera["umls_ids"], serde_json::json!(["C0008049", "C0036572"]));
}
