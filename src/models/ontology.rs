//! The fixed graph vocabulary: ontologies, node labels and edge types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A source ontology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ontology {
    Icd10,
    Hpo,
}

impl Ontology {
    /// The tag stored on nodes (`ontology` property).
    pub fn tag(self) -> &'static str {
        match self {
            Ontology::Icd10 => "ICD10",
            Ontology::Hpo => "HPO",
        }
    }

    /// The label of the ontology's leaf-level nodes.
    pub fn concept_label(self) -> NodeLabel {
        match self {
            Ontology::Icd10 => NodeLabel::IcdDisease,
            Ontology::Hpo => NodeLabel::HpoPhenotype,
        }
    }

    /// Every label that belongs to this ontology.
    pub fn labels(self) -> &'static [NodeLabel] {
        match self {
            Ontology::Icd10 => &[
                NodeLabel::IcdChapter,
                NodeLabel::IcdGroup,
                NodeLabel::IcdDisease,
            ],
            Ontology::Hpo => &[NodeLabel::HpoPhenotype],
        }
    }
}

impl fmt::Display for Ontology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Ontology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icd10" | "icd" => Ok(Ontology::Icd10),
            "hpo" => Ok(Ontology::Hpo),
            other => Err(format!("unknown ontology '{}'", other)),
        }
    }
}

/// Node labels. Every node carries exactly one label and is identified by
/// `(label, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    IcdChapter,
    IcdGroup,
    IcdDisease,
    HpoPhenotype,
    Patient,
    PatientAnnotation,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 6] = [
        NodeLabel::IcdChapter,
        NodeLabel::IcdGroup,
        NodeLabel::IcdDisease,
        NodeLabel::HpoPhenotype,
        NodeLabel::Patient,
        NodeLabel::PatientAnnotation,
    ];

    /// Labels that receive label embeddings.
    pub const EMBEDDABLE: [NodeLabel; 2] = [NodeLabel::IcdDisease, NodeLabel::HpoPhenotype];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeLabel::IcdChapter => "IcdChapter",
            NodeLabel::IcdGroup => "IcdGroup",
            NodeLabel::IcdDisease => "IcdDisease",
            NodeLabel::HpoPhenotype => "HpoPhenotype",
            NodeLabel::Patient => "Patient",
            NodeLabel::PatientAnnotation => "PatientAnnotation",
        }
    }

    pub fn ontology(self) -> Option<Ontology> {
        match self {
            NodeLabel::IcdChapter | NodeLabel::IcdGroup | NodeLabel::IcdDisease => {
                Some(Ontology::Icd10)
            }
            NodeLabel::HpoPhenotype => Some(Ontology::Hpo),
            NodeLabel::Patient | NodeLabel::PatientAnnotation => None,
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    ChapterHasGroup,
    ChapterHasDisease,
    GroupHasDisease,
    HasChild,
    UmlsCrossMap,
    HasAnnotation,
    Annotates,
}

impl EdgeType {
    pub const ALL: [EdgeType; 7] = [
        EdgeType::ChapterHasGroup,
        EdgeType::ChapterHasDisease,
        EdgeType::GroupHasDisease,
        EdgeType::HasChild,
        EdgeType::UmlsCrossMap,
        EdgeType::HasAnnotation,
        EdgeType::Annotates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::ChapterHasGroup => "CHAPTER_HAS_GROUP",
            EdgeType::ChapterHasDisease => "CHAPTER_HAS_DISEASE",
            EdgeType::GroupHasDisease => "GROUP_HAS_DISEASE",
            EdgeType::HasChild => "HAS_CHILD",
            EdgeType::UmlsCrossMap => "UMLS_CROSS_MAP",
            EdgeType::HasAnnotation => "HAS_ANNOTATION",
            EdgeType::Annotates => "ANNOTATES",
        }
    }

    /// The hierarchy edge type linking `parent` to `child`, if the pair is allowed.
    pub fn hierarchy(parent: NodeLabel, child: NodeLabel) -> Option<EdgeType> {
        use NodeLabel::*;
        match (parent, child) {
            (IcdChapter, IcdGroup) => Some(EdgeType::ChapterHasGroup),
            (IcdChapter, IcdDisease) => Some(EdgeType::ChapterHasDisease),
            (IcdGroup, IcdDisease) => Some(EdgeType::GroupHasDisease),
            (IcdDisease, IcdDisease) | (HpoPhenotype, HpoPhenotype) => Some(EdgeType::HasChild),
            _ => None,
        }
    }

    pub fn is_hierarchy(self) -> bool {
        matches!(
            self,
            EdgeType::ChapterHasGroup
                | EdgeType::ChapterHasDisease
                | EdgeType::GroupHasDisease
                | EdgeType::HasChild
        )
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_edge_types() {
        assert_eq!(
            EdgeType::hierarchy(NodeLabel::IcdGroup, NodeLabel::IcdDisease),
            Some(EdgeType::GroupHasDisease)
        );
        assert_eq!(
            EdgeType::hierarchy(NodeLabel::HpoPhenotype, NodeLabel::HpoPhenotype),
            Some(EdgeType::HasChild)
        );
        assert_eq!(
            EdgeType::hierarchy(NodeLabel::IcdDisease, NodeLabel::HpoPhenotype),
            None
        );
        assert_eq!(
            EdgeType::hierarchy(NodeLabel::IcdDisease, NodeLabel::IcdGroup),
            None
        );
    }

    #[test]
    fn test_ontology_from_str() {
        assert_eq!("ICD10".parse::<Ontology>().unwrap(), Ontology::Icd10);
        assert_eq!("hpo".parse::<Ontology>().unwrap(), Ontology::Hpo);
        assert!("snomed".parse::<Ontology>().is_err());
    }

    #[test]
    fn test_label_ontology() {
        for label in Ontology::Icd10.labels() {
            assert_eq!(label.ontology(), Some(Ontology::Icd10));
        }
        assert_eq!(NodeLabel::Patient.ontology(), None);
    }
}
