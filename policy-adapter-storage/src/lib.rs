//! Storage layer for the policy document adapter
//!
//! Provides the document-store operations the adapter is written against.
//! Supports an in-process store (for development and tests) and a Couchbase
//! backend.

pub mod error;
pub mod memory;
pub mod options;
pub mod traits;

#[cfg(feature = "couchbase")]
pub mod couchbase;

pub use error::StorageError;
pub use memory::InMemoryRuleStore;
pub use options::ConnectionOptions;
pub use traits::{ConnectStore, RuleStore, RuleStream};

#[cfg(feature = "couchbase")]
pub use couchbase::{CouchbaseConfig, CouchbaseRuleStore, CouchbaseSelector};
