//! SQLite backend for rollout deployment and workflow documents.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Documents are stored whole as JSON;
//! every write replaces the ETag, and patches are conditional on it.

mod document;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
