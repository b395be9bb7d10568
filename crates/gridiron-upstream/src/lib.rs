//! Gridiron Upstream Sources
//!
//! This crate provides the client side of the upstream data providers.
//! Every provider is an opaque fetch function returning JSON; the shape of
//! that JSON is interpreted elsewhere.

pub mod error;
pub mod http;
pub mod source;

pub use error::UpstreamError;
pub use http::{HttpSource, HttpSourceConfig};
pub use source::{FnSource, UpstreamSource};
