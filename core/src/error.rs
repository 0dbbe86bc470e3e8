use thiserror::Error;

use crate::validation::ValidationErrors;

/// Error type returned by every engine operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("no matching record found")]
    NotFound,

    #[error("edit conflict: {entity} {id} was modified by another request")]
    UpdateConflict { entity: &'static str, id: i64 },

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("duplicate {field} for owner")]
    DuplicateKey { field: &'static str },

    #[error("no dives have been logged")]
    NoData,

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Dependency(DependencyError::Timeout { .. }))
    }
}

/// Failure of a collaborator the engine depends on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyError {
    #[error("{operation} timed out")]
    Timeout { operation: String },

    #[error("failed to resolve time zone '{zone}' for dive site {site_id}: {reason}")]
    TimeZone {
        site_id: i64,
        zone: String,
        reason: String,
    },

    #[error("data source error during {operation}: {message}")]
    Source { operation: String, message: String },
}

/// Error returned by data-access collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("record not found")]
    NotFound,

    #[error("deadline exceeded")]
    Timeout,

    #[error("unique constraint violated on {field}")]
    Duplicate { field: &'static str },

    #[error("cancelled")]
    Cancelled,

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Attach the failing operation and convert into the engine taxonomy.
    pub fn during(self, operation: &str) -> EngineError {
        match self {
            SourceError::NotFound => EngineError::NotFound,
            SourceError::Duplicate { field } => EngineError::DuplicateKey { field },
            SourceError::Cancelled => EngineError::Cancelled,
            SourceError::Timeout => DependencyError::Timeout {
                operation: operation.to_string(),
            }
            .into(),
            SourceError::Unavailable(message) => DependencyError::Source {
                operation: operation.to_string(),
                message,
            }
            .into(),
        }
    }
}

/// Error type for sort query parsing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SortParseError {
    #[error("parse error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown sort field: {0}")]
    UnknownField(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::UpdateConflict {
            entity: "dive",
            id: 7,
        };
        assert_eq!(
            err.to_string(),
            "edit conflict: dive 7 was modified by another request"
        );

        let err = EngineError::DuplicateKey { field: "number" };
        assert_eq!(err.to_string(), "duplicate number for owner");

        let err: EngineError = DependencyError::Timeout {
            operation: "fetch dives".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "fetch dives timed out");
    }

    #[test]
    fn test_source_error_mapping() {
        assert_eq!(SourceError::NotFound.during("x"), EngineError::NotFound);
        assert_eq!(
            SourceError::Duplicate { field: "number" }.during("insert dive"),
            EngineError::DuplicateKey { field: "number" }
        );

        let err = SourceError::Timeout.during("fetch rollup");
        assert!(err.is_retryable());
        assert_ne!(err, EngineError::NotFound);

        let err = SourceError::Unavailable("connection reset".to_string()).during("fetch rollup");
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "data source error during fetch rollup: connection reset"
        );
    }
}
