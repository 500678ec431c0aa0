//! Document database adapter for policy storage
//!
//! Persists the rules of an authorization engine's policy model as one
//! document per rule and loads them back, implementing the engine's
//! persistence contract on top of a [`RuleStore`].

pub mod adapter;
pub mod config;
pub mod error;
pub mod traits;

pub use adapter::DocumentAdapter;
pub use config::{AdapterConfig, AdapterOptions, DEFAULT_TIMEOUT};
pub use error::{AdapterError, ErrorKind};
pub use traits::{Adapter, BatchAdapter, FilteredAdapter, UpdatableAdapter};

pub use policy_adapter_core::{
    load_policy_line, load_policy_rule, CasbinRule, CoreError, MemoryModel, Model, PolicyGroup, RuleFilter, COLLECTION_NAME,
    DEFAULT_DATABASE,
};
pub use policy_adapter_storage::{
    ConnectStore, ConnectionOptions, InMemoryRuleStore, RuleStore, StorageError,
};

#[cfg(feature = "couchbase")]
pub use policy_adapter_storage::{CouchbaseConfig, CouchbaseRuleStore, CouchbaseSelector};
