//! Storage layer
//!
//! Durable key-value persistence for the mutation queue and entity cache.
//!
//! ## Architecture
//!
//! - **KeyValueStore**: get/set/remove of strings, crash-safe per key
//! - **SqliteStore**: production backend (WAL, one `kv` table)
//! - **MemoryStore**: isolated in-process backend for tests
//!
//! Only the queue and cache modules read or write these keys.

pub mod error;
pub mod kv;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use kv::{JsonStoreExt, KeyValueStore, MemoryStore, SqliteStore};
pub use schema::{init_schema, needs_init, schema_version, SCHEMA_VERSION};
