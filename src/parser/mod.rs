//! Flat-file record parsing.
//!
//! A [`RecordSchema`] describes where each named field sits in a line; a
//! [`RecordReader`] applies it lazily to a file and yields [`Record`]s. What
//! happens on a malformed line is decided by the [`ErrorPolicy`].

mod defaults;
mod reader;
mod schema;

pub use defaults::{
    hpo_terms, icd10_chapters, icd10_codes, icd10_groups, umls_concepts, SchemaSet,
};
pub use reader::{RecordReader, SkippedLine};
pub use schema::{FieldSpec, Layout, Record, RecordSchema};

use serde::{Deserialize, Serialize};

/// What to do with a malformed line.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop at the first malformed line.
    #[default]
    Abort,
    /// Record the line number and continue.
    Skip,
}
