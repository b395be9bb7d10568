//! Gridiron Persistent Store
//!
//! This crate provides the durable store for teams, players, games,
//! injuries and the sync log, using SQLite via sqlx for persistence.
//! Every write is an idempotent upsert keyed by a natural identifier.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::{DbError, ValidationError};
pub use models::*;
pub use repository::{
    Database, DatabaseOptions, GameQuery, InjuryQuery, PlayerQuery, SyncLogQuery,
};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
