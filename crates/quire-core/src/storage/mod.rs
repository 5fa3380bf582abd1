//! Storage layer
//!
//! Items are persisted to SQLite as JSON documents, one row per item, with a
//! few columns pulled out for queries. The in-memory map in `Store` is the
//! working copy; every committed mutation is written through before it
//! becomes visible.

pub mod error;
pub mod persistence;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use persistence::SqliteStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
