//! Application error types and their exit-code categories.

use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors for ontolink.
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("{source_name}:{line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Hierarchy errors
    #[error("Dangling reference: {label} '{child}' points to missing parent '{parent}'")]
    DanglingReference {
        label: String,
        child: String,
        parent: String,
    },

    // Store errors
    #[error("Load of {source_name} failed in batch {batch}: {message}")]
    Load {
        source_name: String,
        batch: usize,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("Query error: {message}")]
    Query { message: String, query: String },

    // Embedding errors
    #[error("Embedding failed for {node}: {message}")]
    Embedding { node: String, message: String },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error categories reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Load,
    Config,
    Other,
}

impl ErrorCategory {
    /// Process exit code for a fatal error of this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Parse => 2,
            ErrorCategory::Load => 3,
            ErrorCategory::Config => 4,
            ErrorCategory::Other => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Parse => "parse",
            ErrorCategory::Load => "load",
            ErrorCategory::Config => "config",
            ErrorCategory::Other => "other",
        }
    }
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Parse { .. } | AppError::Io { .. } => ErrorCategory::Parse,
            AppError::Load { .. }
            | AppError::Connection(_)
            | AppError::Neo4j(_)
            | AppError::Query { .. } => ErrorCategory::Load,
            AppError::Config(_) | AppError::InvalidConfig(_) => ErrorCategory::Config,
            AppError::DanglingReference { .. }
            | AppError::Embedding { .. }
            | AppError::Internal(_) => ErrorCategory::Other,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_carries_line() {
        let err = AppError::Parse {
            source_name: "codes.txt".to_string(),
            line: 7,
            message: "expected 3 columns, found 2".to_string(),
        };
        assert_eq!(err.to_string(), "codes.txt:7: expected 3 columns, found 2");
        assert_eq!(err.category().exit_code(), 2);
    }

    #[test]
    fn test_load_error_category() {
        let err = AppError::Load {
            source_name: "groups.txt".to_string(),
            batch: 3,
            message: "connection reset".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Load);
        assert!(err.to_string().contains("batch 3"));
    }
}
