//! Patient annotation CSV import.
//!
//! Each row names a patient and lists coded observations. A whole file is
//! one ingestion batch identified by the SHA-256 of its contents, so the
//! same file always produces the same annotation ids.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::hierarchy::NodeIndex;
use crate::models::{NodeKey, Ontology, PatientAnnotation, Warning};
use crate::parser::{ErrorPolicy, FieldSpec, RecordReader, RecordSchema, SkippedLine};

/// A column holding codes of one ontology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeColumn {
    pub field: String,
    pub ontology: Ontology,
    #[serde(default = "default_separator")]
    pub separator: char,
}

fn default_separator() -> char {
    ';'
}

/// The `[patients]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientSchema {
    pub record: RecordSchema,
    /// Record field holding the patient identifier.
    pub patient_field: String,
    pub code_columns: Vec<CodeColumn>,
}

impl Default for PatientSchema {
    fn default() -> Self {
        Self {
            record: RecordSchema::delimited(
                "patients",
                ',',
                vec![
                    FieldSpec::named("PatientID", "PatientID").required(),
                    FieldSpec::named("ICD10_Codes", "ICD10_Codes"),
                ],
            )
            .with_quote('"')
            .with_header(),
            patient_field: "PatientID".to_string(),
            code_columns: vec![CodeColumn {
                field: "ICD10_Codes".to_string(),
                ontology: Ontology::Icd10,
                separator: default_separator(),
            }],
        }
    }
}

impl PatientSchema {
    pub fn validate(&self) -> Result<(), String> {
        self.record.validate()?;
        if self.record.field(&self.patient_field).is_none() {
            return Err(format!(
                "patients: patient_field '{}' is not a field of the record schema",
                self.patient_field
            ));
        }
        for column in &self.code_columns {
            if self.record.field(&column.field).is_none() {
                return Err(format!(
                    "patients: code column '{}' is not a field of the record schema",
                    column.field
                ));
            }
        }
        Ok(())
    }
}

/// Splits a cell into codes. A bracketed list (`['A00', 'B01']`) is split on
/// commas; anything else on `separator`. Quotes around codes are dropped.
pub fn split_codes(cell: &str, separator: char) -> Vec<String> {
    let cell = cell.trim();
    let parts: Vec<&str> = match cell.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
        Some(list) => list.split(',').collect(),
        None => cell.split(separator).collect(),
    };

    parts
        .into_iter()
        .map(|code| code.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hex SHA-256 of the file contents.
pub fn batch_id(path: &Path) -> Result<String, AppError> {
    let file = File::open(path).map_err(|e| AppError::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher).map_err(|e| AppError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Everything read from one patient file.
#[derive(Debug, Default)]
pub struct PatientBatch {
    pub batch_id: String,
    pub source: String,
    pub records: usize,
    pub annotations: Vec<PatientAnnotation>,
    pub warnings: Vec<Warning>,
    pub skipped: Vec<SkippedLine>,
}

/// Reads `path` and resolves its codes against `index`.
///
/// Codes missing from `index` become [`Warning::UnresolvedCode`]; the row is
/// still annotated with the codes that did resolve.
pub fn read_patients(
    path: &Path,
    schema: &PatientSchema,
    policy: ErrorPolicy,
    index: &NodeIndex,
    ingested_at: DateTime<Utc>,
) -> Result<PatientBatch, AppError> {
    let batch_id = batch_id(path)?;
    let mut reader = RecordReader::open(path, schema.record.clone(), policy)?;
    let source = reader.source_name().to_string();

    let mut batch = PatientBatch {
        batch_id,
        source: source.clone(),
        ..Default::default()
    };
    let mut missing_patient = Vec::new();

    for record in reader.by_ref() {
        let record = record?;
        batch.records += 1;

        let Some(patient_id) = record.get(&schema.patient_field) else {
            let reason = format!("missing {}", schema.patient_field);
            if policy == ErrorPolicy::Abort {
                return Err(AppError::Parse {
                    source_name: source,
                    line: record.line,
                    message: reason,
                });
            }
            tracing::warn!(source = %source, line = record.line, "Skipping line: {}", reason);
            missing_patient.push(SkippedLine {
                line: record.line,
                reason,
            });
            continue;
        };

        let mut targets = Vec::new();
        for column in &schema.code_columns {
            for code in split_codes(record.get_or_empty(&column.field), column.separator) {
                let key = NodeKey::new(column.ontology.concept_label(), code.as_str());
                if index.contains(&key) {
                    targets.push((key, column.field.clone()));
                } else {
                    batch.warnings.push(Warning::UnresolvedCode {
                        source: source.clone(),
                        line: record.line,
                        code,
                    });
                }
            }
        }

        batch.annotations.push(PatientAnnotation {
            patient_id: patient_id.to_string(),
            batch_id: batch.batch_id.clone(),
            source: source.clone(),
            line: record.line,
            ingested_at,
            targets,
        });
    }

    let mut skipped = reader.into_skipped();
    skipped.extend(missing_patient);
    skipped.sort_by_key(|s| s.line);
    batch.skipped = skipped;

    tracing::info!(
        source = %batch.source,
        batch = %batch.batch_id,
        rows = batch.annotations.len(),
        "Read patient annotations"
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::models::NodeLabel;

    fn write(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn index() -> NodeIndex {
        [
            NodeKey::new(NodeLabel::IcdDisease, "A00"),
            NodeKey::new(NodeLabel::IcdDisease, "B01"),
        ]
        .iter()
        .collect()
    }

    #[test]
    fn test_split_codes() {
        assert_eq!(split_codes("['A00', 'B01']", ';'), vec!["A00", "B01"]);
        assert_eq!(split_codes("A00; B01;", ';'), vec!["A00", "B01"]);
        assert_eq!(split_codes("\"A00\"", ';'), vec!["A00"]);
        assert!(split_codes("[]", ';').is_empty());
        assert!(split_codes("", ';').is_empty());
    }

    #[test]
    fn test_reads_original_layout() {
        let file = write(
            "PatientID,ICD10_Codes\n\
             P1,\"['A00', 'B01']\"\n\
             P2,\"['Z99']\"\n",
        );
        let batch = read_patients(
            file.path(),
            &PatientSchema::default(),
            ErrorPolicy::Abort,
            &index(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(batch.batch_id.len(), 64);
        assert_eq!(batch.annotations.len(), 2);
        assert_eq!(batch.annotations[0].targets.len(), 2);
        assert_eq!(batch.annotations[0].line, 2);
        assert!(batch.annotations[1].targets.is_empty());
        assert!(matches!(
            &batch.warnings[..],
            [Warning::UnresolvedCode { line: 3, code, .. }] if code == "Z99"
        ));
    }

    #[test]
    fn test_missing_patient_id_follows_policy() {
        let file = write("PatientID,ICD10_Codes\n,A00\nP2,B01\n");
        let schema = PatientSchema::default();

        let err = read_patients(file.path(), &schema, ErrorPolicy::Abort, &index(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::Parse { line: 2, .. }));

        let batch =
            read_patients(file.path(), &schema, ErrorPolicy::Skip, &index(), Utc::now()).unwrap();
        assert_eq!(batch.annotations.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].line, 2);
    }

    #[test]
    fn test_batch_id_follows_contents() {
        let a = write("PatientID,ICD10_Codes\nP1,A00\n");
        let b = write("PatientID,ICD10_Codes\nP1,A00\n");
        let c = write("PatientID,ICD10_Codes\nP1,B01\n");
        assert_eq!(batch_id(a.path()).unwrap(), batch_id(b.path()).unwrap());
        assert_ne!(batch_id(a.path()).unwrap(), batch_id(c.path()).unwrap());
    }

    #[test]
    fn test_schema_validation() {
        let mut schema = PatientSchema::default();
        assert!(schema.validate().is_ok());
        schema.patient_field = "patient".to_string();
        assert!(schema.validate().is_err());
    }
}
