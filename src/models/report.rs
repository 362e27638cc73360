//! End-of-run reporting: per-source counts, warnings and fatal errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{AppError, ErrorCategory};

/// A non-fatal problem collected during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A hierarchy parent never appeared.
    DanglingReference {
        label: String,
        child: String,
        parent: String,
    },
    /// A second, different parent was offered for an already linked child.
    HierarchyConflict {
        label: String,
        child: String,
        kept: String,
        rejected: String,
    },
    /// The edge would have closed a cycle.
    Cycle {
        label: String,
        child: String,
        parent: String,
    },
    /// A code that matches no loaded node.
    UnresolvedCode {
        source: String,
        line: usize,
        code: String,
    },
    /// Embedding retries were exhausted for a node.
    EmbeddingFailed {
        node: String,
        attempts: u32,
        message: String,
    },
    /// A malformed input line skipped under the skip policy.
    SkippedLine {
        source: String,
        line: usize,
        reason: String,
    },
}

impl Warning {
    pub fn category(&self) -> &'static str {
        match self {
            Warning::DanglingReference { .. } => "dangling_reference",
            Warning::HierarchyConflict { .. } => "hierarchy_conflict",
            Warning::Cycle { .. } => "cycle",
            Warning::UnresolvedCode { .. } => "unresolved_code",
            Warning::EmbeddingFailed { .. } => "embedding",
            Warning::SkippedLine { .. } => "skipped_line",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DanglingReference {
                label,
                child,
                parent,
            } => write!(f, "{} '{}' has no parent '{}'", label, child, parent),
            Warning::HierarchyConflict {
                label,
                child,
                kept,
                rejected,
            } => write!(
                f,
                "{} '{}' already has parent '{}', ignored '{}'",
                label, child, kept, rejected
            ),
            Warning::Cycle {
                label,
                child,
                parent,
            } => write!(
                f,
                "{} '{}' -> '{}' would close a cycle",
                label, parent, child
            ),
            Warning::UnresolvedCode { source, line, code } => {
                write!(f, "{}:{}: code '{}' not found", source, line, code)
            }
            Warning::EmbeddingFailed {
                node,
                attempts,
                message,
            } => write!(
                f,
                "no embedding for {} after {} attempts: {}",
                node, attempts, message
            ),
            Warning::SkippedLine {
                source,
                line,
                reason,
            } => write!(f, "{}:{}: skipped, {}", source, line, reason),
        }
    }
}

/// Outcome of importing one source file or pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceReport {
    /// File name or pass name.
    pub source: String,
    /// Import kind (`icd10-codes`, `umls`, `relink`, ...).
    pub kind: String,
    pub records: usize,
    pub nodes: usize,
    pub edges: usize,
    pub skipped_lines: Vec<usize>,
    /// Fatal error that stopped this source, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn new(source: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }
}

/// Summary of a command run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub embedded: usize,
    pub warnings: Vec<Warning>,
    #[serde(skip)]
    errors: Vec<(ErrorCategory, String)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: SourceReport) {
        self.sources.push(source);
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(category = warning.category(), "{}", warning);
        self.warnings.push(warning);
    }

    pub fn extend_warnings(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for warning in warnings {
            self.warn(warning);
        }
    }

    /// Records a fatal error for one source; the run goes on with the next source.
    pub fn fail(&mut self, mut source: SourceReport, error: &AppError) {
        tracing::error!(source = %source.source, "{}", error);
        source.error = Some(error.to_string());
        self.errors.push((error.category(), error.to_string()));
        self.sources.push(source);
    }

    pub fn merge(&mut self, other: RunReport) {
        self.sources.extend(other.sources);
        self.embedded += other.embedded;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn nodes_loaded(&self) -> usize {
        self.sources.iter().map(|s| s.nodes).sum()
    }

    pub fn edges_loaded(&self) -> usize {
        self.sources.iter().map(|s| s.edges).sum()
    }

    pub fn rows_skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped_lines.len()).sum()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Category of the first fatal error.
    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.errors.first().map(|(category, _)| *category)
    }

    pub fn exit_code(&self) -> i32 {
        self.error_category().map_or(0, ErrorCategory::exit_code)
    }

    /// Warning counts keyed by category.
    pub fn warning_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for warning in &self.warnings {
            *counts.entry(warning.category()).or_default() += 1;
        }
        counts
    }

    /// Error counts keyed by category.
    pub fn error_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for (category, _) in &self.errors {
            *counts.entry(category.as_str()).or_default() += 1;
        }
        counts
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for source in &self.sources {
            write!(
                f,
                "{:<16} {:<32} records={} nodes={} edges={} skipped={}",
                source.kind,
                source.source,
                source.records,
                source.nodes,
                source.edges,
                source.skipped_lines.len()
            )?;
            if let Some(error) = &source.error {
                write!(f, " FAILED: {}", error)?;
            }
            writeln!(f)?;
        }
        if self.embedded > 0 {
            writeln!(f, "embedded: {}", self.embedded)?;
        }
        writeln!(
            f,
            "total: nodes={} edges={} skipped_rows={}",
            self.nodes_loaded(),
            self.edges_loaded(),
            self.rows_skipped()
        )?;
        for (category, count) in self.warning_counts() {
            writeln!(f, "warnings[{}]: {}", category, count)?;
        }
        for (category, count) in self.error_counts() {
            writeln!(f, "errors[{}]: {}", category, count)?;
        }
        Ok(())
    }
}
