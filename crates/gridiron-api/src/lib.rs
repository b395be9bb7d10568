//! Gridiron REST API
//!
//! This crate provides the Axum-based HTTP surface of the sync service:
//! cached read endpoints, sync control and cache administration.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
