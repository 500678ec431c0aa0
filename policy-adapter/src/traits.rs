//! Persistence contract expected by the authorization engine

use async_trait::async_trait;
use policy_adapter_core::Model;

use crate::AdapterError;

/// Core policy persistence operations
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Load every stored rule into `model`
    async fn load_policy(&mut self, model: &mut dyn Model) -> Result<(), AdapterError>;

    /// Replace all stored rules with the rules held by `model`
    async fn save_policy(&self, model: &dyn Model) -> Result<(), AdapterError>;

    /// Remove every stored rule
    async fn clear_policy(&self) -> Result<(), AdapterError>;

    /// Store a single rule
    async fn add_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Remove the stored rule equal to `rule`, if any
    async fn remove_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Remove rules whose fields starting at `field_index` match `field_values`.
    ///
    /// Empty values match anything, and an empty `field_values` removes every
    /// rule of `ptype`.
    ///
    /// A `field_index` past the last stored position (5) is rejected with
    /// [`CoreError::FieldIndexOutOfRange`](policy_adapter_core::CoreError),
    /// reported as [`ErrorKind::Invalid`](crate::ErrorKind::Invalid), and
    /// nothing is removed. This is an invalid-argument failure outside the
    /// store error kinds.
    async fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<(), AdapterError>;
}

/// Adapters that can load a subset of the stored rules
#[async_trait]
pub trait FilteredAdapter: Adapter {
    /// Store-native selector
    type Filter: Send + Sync;

    /// Load rules matching `filter`, or every rule when it is `None`
    async fn load_filtered_policy(
        &mut self,
        model: &mut dyn Model,
        filter: Option<&Self::Filter>,
    ) -> Result<(), AdapterError>;

    /// Whether the last load was restricted by a filter
    fn is_filtered(&self) -> bool;
}

/// Adapters that can change a stored rule in place
#[async_trait]
pub trait UpdatableAdapter: Adapter {
    async fn update_policy(
        &self,
        sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<(), AdapterError>;
}

/// Adapters that add or remove several rules of one type per call
#[async_trait]
pub trait BatchAdapter: Adapter {
    async fn add_policies(&self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError>;

    async fn remove_policies(&self, sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError>;
}
