//! Gridiron Durable Key Store
//!
//! This crate provides the key/value abstraction behind the cache spill-over,
//! with an on-disk implementation and an in-memory one.

pub mod backend;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{PersistentKeyStore, key_digest};
pub use error::StorageError;
pub use local::LocalKeyStore;
pub use memory::MemoryKeyStore;
