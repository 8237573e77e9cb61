use thiserror::Error;

/// Main error type for randopt
#[derive(Error, Debug)]
pub enum RoError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Malformed record {path}: {message}")]
    MalformedRecord { path: String, message: String },

    #[error("Attachment not found for record: {record_id}")]
    MissingAttachment { record_id: String },

    #[error("Cannot create experiment directory {path}: {message}")]
    DirectoryUnavailable { path: String, message: String },
}

/// Search context and strategy errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Parameter name is reserved: {name}")]
    ReservedName { name: String },

    #[error("Parameter declared twice: {name}")]
    DuplicateParameter { name: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Sampler for parameter {parameter} has no enumerable domain")]
    UnsupportedSampler { parameter: String },

    #[error("Parameter {name} is not numeric: {value}")]
    NonNumericParameter { name: String, value: String },

    #[error("Invalid bracket configuration: {message}")]
    InvalidBracket { message: String },
}

/// Result type alias for randopt operations
pub type RoResult<T> = Result<T, RoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::RoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::RoError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SearchError::ReservedName {
            name: "result".to_string(),
        };
        assert!(error.to_string().contains("reserved"));
        assert!(error.to_string().contains("result"));
    }

    #[test]
    fn test_error_conversion() {
        let store_error = StoreError::MissingAttachment {
            record_id: "abc".to_string(),
        };
        let ro_error: RoError = store_error.into();

        match ro_error {
            RoError::Store(StoreError::MissingAttachment { record_id }) => {
                assert_eq!(record_id, "abc")
            }
            other => panic!("Expected MissingAttachment, got: {:?}", other),
        }
    }

    #[test]
    fn test_macros() {
        let validation = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation, RoError::Validation(ref m) if m == "Invalid value: 42"));
        let config = config_error!("Missing field: {}", "root");
        assert!(matches!(config, RoError::Config(_)));
    }
}
