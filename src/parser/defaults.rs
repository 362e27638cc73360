//! Built-in schemas for the WHO ICD10, HPO and UMLS distribution files.

use serde::{Deserialize, Serialize};

use super::schema::{FieldSpec, RecordSchema};

/// `icd102019syst_chapters.txt`: `chapter;title`.
pub fn icd10_chapters() -> RecordSchema {
    RecordSchema::delimited(
        "icd10-chapters",
        ';',
        vec![
            FieldSpec::at("id", 0).required(),
            FieldSpec::at("label", 1).required(),
        ],
    )
}

/// `icd102019syst_groups.txt`: `first;last;chapter;title`.
pub fn icd10_groups() -> RecordSchema {
    RecordSchema::delimited(
        "icd10-groups",
        ';',
        vec![
            FieldSpec::at("start", 0).required(),
            FieldSpec::at("end", 1).required(),
            FieldSpec::at("chapter", 2).required(),
            FieldSpec::at("label", 3).required(),
        ],
    )
}

/// `icd102019syst_codes.txt`: level, place, type, chapter, block start,
/// code with dagger, code, code without dot, title, parent title, ...
pub fn icd10_codes() -> RecordSchema {
    RecordSchema::delimited(
        "icd10-codes",
        ';',
        vec![
            FieldSpec::at("chapter", 3).required(),
            FieldSpec::at("group", 4),
            FieldSpec::at("code", 6).required(),
            FieldSpec::at("label", 8).required(),
            FieldSpec::at("parent_label", 9),
        ],
    )
}

/// HPO term table: `id<TAB>label<TAB>parent`.
pub fn hpo_terms() -> RecordSchema {
    RecordSchema::delimited(
        "hpo",
        '\t',
        vec![
            FieldSpec::at("id", 0).required(),
            FieldSpec::at("label", 1).required(),
            FieldSpec::at("parent", 2),
        ],
    )
    .with_comments("#")
}

/// UMLS `MRCONSO.RRF`. Lines end with `|`, hence 19 columns.
pub fn umls_concepts() -> RecordSchema {
    RecordSchema::delimited(
        "umls",
        '|',
        vec![
            FieldSpec::at("cui", 0).required(),
            FieldSpec::at("sab", 11).required(),
            FieldSpec::at("code", 13).required(),
        ],
    )
    .with_columns(19)
}

/// The `[schemas]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSet {
    pub icd10_chapters: RecordSchema,
    pub icd10_groups: RecordSchema,
    pub icd10_codes: RecordSchema,
    pub hpo: RecordSchema,
    pub umls: RecordSchema,
}

impl Default for SchemaSet {
    fn default() -> Self {
        Self {
            icd10_chapters: icd10_chapters(),
            icd10_groups: icd10_groups(),
            icd10_codes: icd10_codes(),
            hpo: hpo_terms(),
            umls: umls_concepts(),
        }
    }
}

impl SchemaSet {
    pub fn validate(&self) -> Result<(), String> {
        for schema in [
            &self.icd10_chapters,
            &self.icd10_groups,
            &self.icd10_codes,
            &self.hpo,
            &self.umls,
        ] {
            schema.validate()?;
        }
        Ok(())
    }
}
