//! Storage traits defining the document-store interface

use async_trait::async_trait;
use policy_adapter_core::{CasbinRule, RuleFilter};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::{ConnectionOptions, StorageError};

/// Records yielded by a query, decoded one at a time
pub type RuleStream<'a> = Pin<Box<dyn Stream<Item = Result<CasbinRule, StorageError>> + Send + 'a>>;

/// Document operations on the rule collection
#[async_trait]
pub trait RuleStore: Send + Sync + Sized {
    /// Backend-native selector accepted by filtered reads
    type Selector: Send + Sync;

    /// Declare a unique index over `fields`; a no-op if it already exists
    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), StorageError>;

    /// Query records, all of them when `selector` is `None`
    async fn find(&self, selector: Option<&Self::Selector>) -> Result<RuleStream<'_>, StorageError>;

    /// Insert one record, returning its store-assigned identifier
    async fn insert_one(&self, rule: &CasbinRule) -> Result<String, StorageError>;

    /// Insert records in order, stopping at the first failure
    async fn insert_many(&self, rules: &[CasbinRule]) -> Result<usize, StorageError>;

    /// Delete the first record matching `filter`
    async fn delete_one(&self, filter: &RuleFilter) -> Result<u64, StorageError>;

    /// Delete every record matching `filter`
    async fn delete_many(&self, filter: &RuleFilter) -> Result<u64, StorageError>;

    /// Overwrite the key fields of the first record matching `filter`.
    ///
    /// The record identifier is left untouched. Returns the matched count.
    async fn update_one(&self, filter: &RuleFilter, update: &CasbinRule) -> Result<u64, StorageError>;

    /// Remove the collection with its documents and indexes
    async fn drop_collection(&self) -> Result<(), StorageError>;

    /// Release the connection
    async fn close(self) -> Result<(), StorageError>;
}

/// Stores that can be opened from a connection target
#[async_trait]
pub trait ConnectStore: RuleStore {
    /// Scheme assumed when the target has none
    const DEFAULT_SCHEME: &'static str;

    /// Connect and select the rule collection in `database`
    async fn connect(options: &ConnectionOptions, database: &str) -> Result<Self, StorageError>;
}
