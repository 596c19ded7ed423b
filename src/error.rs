use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for the counting layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CountsError {
    /// Entity document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insert of something that is already present
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Delete/replace of an aggregate entry that was never inserted
    #[error("Missing aggregate entry in {aggregate} for {id}")]
    MissingEntry { aggregate: String, id: String },

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The mutation conflicts with existing data (e.g. genre still in use)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration validation failed
    #[error("Validation error: {}", join_issues(.0))]
    ValidationError(Vec<ValidationIssue>),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CountsError {
    /// Whether the error means the counting state and the documents disagree.
    ///
    /// These are the errors backfill exists to repair.
    pub fn is_drift(&self) -> bool {
        matches!(
            self,
            CountsError::MissingEntry { .. } | CountsError::AlreadyExists(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CountsError::NotFound(_))
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for CountsError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::NotFound => CountsError::NotFound(e.to_string()),
    std::io::ErrorKind::InvalidInput => CountsError::InvalidArgument(e.to_string()),
    _ => CountsError::IoError(e.to_string()),
});

impl_from_error!(serde_json::Error, e => CountsError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => CountsError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with CountsError.
pub type CountsResult<T> = Result<T, CountsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_drift() {
        assert!(CountsError::MissingEntry {
            aggregate: "chapters_by_series".to_string(),
            id: "c1".to_string()
        }
        .is_drift());
        assert!(CountsError::AlreadyExists("c1".to_string()).is_drift());

        assert!(!CountsError::NotFound("c1".to_string()).is_drift());
        assert!(!CountsError::IoError("disk".to_string()).is_drift());
        assert!(!CountsError::Conflict("in use".to_string()).is_drift());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: CountsError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_not_found());

        let err: CountsError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, CountsError::IoError(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", CountsError::NotFound("series s1".to_string())),
            "Not found: series s1"
        );
        assert_eq!(
            format!(
                "{}",
                CountsError::MissingEntry {
                    aggregate: "pages_by_chapter".to_string(),
                    id: "p9".to_string()
                }
            ),
            "Missing aggregate entry in pages_by_chapter for p9"
        );

        let err = CountsError::ValidationError(vec![
            ValidationIssue {
                field: "counters.default_shards".to_string(),
                message: "must be at least 1".to_string(),
            },
            ValidationIssue {
                field: "logging.level".to_string(),
                message: "invalid".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Validation error: counters.default_shards: must be at least 1; logging.level: invalid"
        );
    }
}
