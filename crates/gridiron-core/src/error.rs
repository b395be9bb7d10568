//! Core error types

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by caller-supplied fallbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] gridiron_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] gridiron_storage::StorageError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] gridiron_upstream::UpstreamError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Why a single attempt of a wrapped call failed
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Upstream(#[from] gridiron_upstream::UpstreamError),

    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
}

impl AttemptError {
    /// Whether another attempt could succeed
    ///
    /// Timeouts and shape mismatches count as transient; upstream errors
    /// follow their own classification.
    pub fn is_transient(&self) -> bool {
        match self {
            AttemptError::Timeout(_) | AttemptError::Shape(_) => true,
            AttemptError::Upstream(e) => e.is_transient(),
        }
    }

    /// Delay the upstream asked for before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Upstream(gridiron_upstream::UpstreamError::RateLimited {
                retry_after: Some(secs),
            }) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Terminal failure of a wrapped call
///
/// Only produced when every attempt failed and the fallback failed as well.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{operation}: {attempts} attempt(s) failed ({primary}); fallback failed: {fallback}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        primary: AttemptError,
        fallback: BoxError,
    },
}

/// Returned to a trigger while another run holds the run slot
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a sync run is already in progress")]
pub struct AlreadyRunning;
