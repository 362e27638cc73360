//! ICD10 to HPO cross-mapping through UMLS concept identifiers.
//!
//! UMLS rows are grouped by concept (CUI) into a [`ConceptIndex`]; every
//! ICD10 code and HPO code sharing a concept form one [`CrossMapEdge`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::hierarchy::NodeIndex;
use crate::models::{CrossMapEdge, NodeKey, NodeLabel, Ontology};
use crate::parser::Record;

/// The `[umls]` configuration section: which source vocabularies (`SAB`)
/// count as which ontology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmlsConfig {
    pub icd10_sources: Vec<String>,
    pub hpo_sources: Vec<String>,
}

impl Default for UmlsConfig {
    fn default() -> Self {
        Self {
            icd10_sources: vec!["ICD10".to_string(), "ICD10CM".to_string()],
            hpo_sources: vec!["HPO".to_string()],
        }
    }
}

impl UmlsConfig {
    pub fn ontology_of(&self, sab: &str) -> Option<Ontology> {
        if self.icd10_sources.iter().any(|s| s == sab) {
            Some(Ontology::Icd10)
        } else if self.hpo_sources.iter().any(|s| s == sab) {
            Some(Ontology::Hpo)
        } else {
            None
        }
    }
}

/// One concept row: `CUI`, source vocabulary and source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmlsRow {
    pub line: usize,
    pub cui: String,
    pub sab: String,
    pub code: String,
}

impl UmlsRow {
    pub fn from_record(record: &Record) -> Self {
        Self {
            line: record.line,
            cui: record.get_or_empty("cui").to_string(),
            sab: record.get_or_empty("sab").to_string(),
            code: record.get_or_empty("code").to_string(),
        }
    }
}

/// A row whose code matches no loaded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRow {
    pub line: usize,
    pub sab: String,
    pub code: String,
}

/// Concept id to the loaded nodes that carry it.
#[derive(Debug, Default)]
pub struct ConceptIndex {
    by_cui: BTreeMap<String, BTreeSet<NodeKey>>,
    unresolved: Vec<UnresolvedRow>,
    ignored: usize,
    rows: usize,
}

impl ConceptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one row. Rows of other vocabularies are counted and dropped;
    /// codes missing from `nodes` are recorded as unresolved.
    pub fn add(&mut self, row: UmlsRow, sources: &UmlsConfig, nodes: &NodeIndex) {
        self.rows += 1;
        let Some(ontology) = sources.ontology_of(&row.sab) else {
            self.ignored += 1;
            return;
        };

        let key = NodeKey::new(ontology.concept_label(), row.code.as_str());
        if !nodes.contains(&key) {
            self.unresolved.push(UnresolvedRow {
                line: row.line,
                sab: row.sab,
                code: row.code,
            });
            return;
        }
        self.by_cui.entry(row.cui).or_default().insert(key);
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn unresolved(&self) -> &[UnresolvedRow] {
        &self.unresolved
    }

    /// Sorted concept ids per node.
    pub fn concepts_by_node(&self) -> BTreeMap<NodeKey, Vec<String>> {
        let mut out: BTreeMap<NodeKey, Vec<String>> = BTreeMap::new();
        for (cui, keys) in &self.by_cui {
            for key in keys {
                out.entry(key.clone()).or_default().push(cui.clone());
            }
        }
        // by_cui iterates in order, so each list is already sorted
        out
    }

    /// One edge per (ICD10, HPO) pair sharing at least one concept, sorted by pair.
    pub fn cross_map(&self) -> Vec<CrossMapEdge> {
        let mut pairs: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();

        for (cui, keys) in &self.by_cui {
            let icd = keys.iter().filter(|k| k.label == NodeLabel::IcdDisease);
            for icd_key in icd {
                for hpo_key in keys.iter().filter(|k| k.label == NodeLabel::HpoPhenotype) {
                    pairs
                        .entry((icd_key.id.clone(), hpo_key.id.clone()))
                        .or_default()
                        .insert(cui.clone());
                }
            }
        }

        pairs
            .into_iter()
            .map(|((icd10, hpo), cuis)| CrossMapEdge {
                icd10,
                hpo,
                cuis: cuis.into_iter().collect(),
            })
            .collect()
    }
}
