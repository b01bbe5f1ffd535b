//! Error types for the policy store.
//!
//! Configuration problems are raised when the adapter is built. Storage
//! failures from `sqlx` are wrapped without modification so callers can
//! inspect the underlying database error.

use thiserror::Error;

/// Result type used throughout the policy store.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur in policy store operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The row schema does not define a required column
    #[error("Column {0} not found in rule schema")]
    MissingColumn(String),

    /// The soft-delete column is missing or not boolean
    #[error("Soft-delete column {column} must be BOOLEAN, found {found}")]
    InvalidSoftDeleteColumn { column: String, found: String },

    /// A table or column name is not a plain SQL identifier
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Invalid adapter configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No visible row matches the rule
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// More than one visible row matches the rule
    #[error("Rule {rule} matched {count} rows, expected exactly one")]
    AmbiguousRule { rule: String, count: usize },

    /// Old and new rule lists differ in length
    #[error("Cannot pair {old} old rules with {new} new rules")]
    LengthMismatch { old: usize, new: usize },

    /// A rule carries more values than the row schema can hold
    #[error("Rule has {0} values, at most 6 are supported")]
    TooManyValues(usize),

    /// A field index outside v0..v5
    #[error("Field index {0} is out of range (0..=5)")]
    FieldIndexOutOfRange(usize),

    /// The shared session was already committed or rolled back
    #[error("Shared session is closed")]
    SessionClosed,

    /// Storage engine failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AdapterError::AmbiguousRule {
            rule: "p, alice, data1, read".to_string(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Rule p, alice, data1, read matched 2 rows, expected exactly one"
        );

        let err = AdapterError::FieldIndexOutOfRange(7);
        assert_eq!(err.to_string(), "Field index 7 is out of range (0..=5)");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AdapterError = json_err.into();
        assert!(matches!(err, AdapterError::Serialization(_)));
    }
}
