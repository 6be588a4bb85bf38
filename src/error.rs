//! Error types shared by every engine in this crate.
//!
//! # Error Handling Strategy
//!
//! All fallible operations in this crate return `Result<T, CoreError>`. `CoreError` is a
//! single enum covering every engine (metadata generation, expression parsing, mapping
//! validation, transformation, graph translation, AAG generation) so that a caller only
//! has to match on one error type regardless of which stage failed.
//!
//! The one exception is a *value cast miss*: parsing a raw cell string against a
//! [`crate::types::DataType`] and failing is not an error. It is translated into a
//! missing value (`None`) by the caller and propagates as "no match" in predicates and
//! conclusions. See [`crate::types::DataType::cast`].

use thiserror::Error;

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A table or variable referenced by name does not exist, or a row's columns do not
    /// match the header previously seen for that table.
    #[error("schema error in table {table:?}: {message}")]
    Schema {
        table: Option<String>,
        message: String,
    },

    /// A logical expression or conclusion string could not be parsed.
    #[error("parse error: {message} (input: {input:?})")]
    Parse { message: String, input: String },

    /// A data mapping is structurally invalid: unreachable source table, inheritance
    /// cycle, duplicate primary key within a `Merge`, a metric variable declared
    /// `String`, etc.
    #[error("validation error in table {table:?}: {message}")]
    Validation {
        table: Option<String>,
        message: String,
    },

    /// A default value, filter operand, or aggregator result is incompatible with the
    /// data type it is being compared or cast against.
    #[error("type mismatch for variable {variable:?} in table {table:?}: {message}")]
    TypeMismatch {
        table: Option<String>,
        variable: Option<String>,
        message: String,
    },

    /// A [`crate::io::GraphSource`] query failed in the collaborator backing it.
    #[error("backend error: {0}")]
    Backend(String),

    /// A cooperative cancellation token was observed during a long-running stage.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            table: Some(table.into()),
            message: message.into(),
        }
    }

    pub fn schema_unscoped(message: impl Into<String>) -> Self {
        Self::Schema {
            table: None,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            input: input.into(),
        }
    }

    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            table: Some(table.into()),
            message: message.into(),
        }
    }

    pub fn validation_unscoped(message: impl Into<String>) -> Self {
        Self::Validation {
            table: None,
            message: message.into(),
        }
    }

    pub fn type_mismatch(
        table: impl Into<String>,
        variable: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            table: Some(table.into()),
            variable: Some(variable.into()),
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_display() {
        let err = CoreError::schema("patients", "missing column AGE");
        assert_eq!(
            err.to_string(),
            "schema error in table Some(\"patients\"): missing column AGE"
        );
    }

    #[test]
    fn test_parse_display() {
        let err = CoreError::parse("unexpected token", "(BAD)");
        assert_eq!(err.to_string(), "parse error: unexpected token (input: \"(BAD)\")");
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(CoreError::Cancelled.to_string(), "operation cancelled");
    }
}
