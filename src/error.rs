//! Error Types
//!
//! A single error taxonomy for everything that can go wrong while
//! building or serializing a workflow: bad input tables, unresolvable
//! datasets, malformed graphs, I/O.

use thiserror::Error;

/// Errors raised while generating a DAX document.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse input data: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown dataset type '{0}'")]
    UnknownDatasetType(String),

    #[error("data id for '{dataset}' is missing key '{key}'")]
    MissingIdKey { dataset: String, key: String },

    #[error("invalid path template '{template}': {reason}")]
    BadTemplate { template: String, reason: String },

    #[error("file '{0}' is produced by more than one job")]
    DuplicateProducer(String),

    #[error("workflow contains cyclic dependencies")]
    CyclicDependency,

    #[error("invalid input data: {0}")]
    InvalidInput(String),

    #[error("registry database error: {0}")]
    Registry(#[from] rusqlite::Error),

    #[error("failed to write DAX document: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GenError::UnknownDatasetType("calexp2".to_string());
        assert!(err.to_string().contains("calexp2"));

        let err = GenError::MissingIdKey {
            dataset: "calexp".to_string(),
            key: "visit".to_string(),
        };
        assert!(err.to_string().contains("calexp"));
        assert!(err.to_string().contains("visit"));

        let err = GenError::CyclicDependency;
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GenError = io.into();
        assert!(matches!(err, GenError::Io(_)));
    }
}
