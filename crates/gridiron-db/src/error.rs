//! Database error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl DbError {
    /// Whether the error concerns a single malformed record rather than the store itself
    pub fn is_validation(&self) -> bool {
        matches!(self, DbError::Validation(_))
    }
}

/// A record rejected before anything was written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{entity}: missing required field `{field}`")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: unresolved reference {reference}")]
    UnresolvedReference {
        entity: &'static str,
        reference: String,
    },

    #[error("{entity}: invalid value for `{field}`: {reason}")]
    InvalidField {
        entity: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("{entity}: malformed record: {reason}")]
    Malformed {
        entity: &'static str,
        reason: String,
    },
}
