//! Policy adapter over a document store
//!
//! Every rule of the policy model is one document in the `casbin_rule`
//! collection with fields `ptype` and `v0`..`v5`. A unique index over those
//! seven fields keeps a rule from being stored twice.

use async_trait::async_trait;
use policy_adapter_core::{
    load_policy_rule, CasbinRule, CoreError, Model, RuleFilter, DEFAULT_DATABASE, MAX_FIELDS,
    RULE_KEY_FIELDS,
};
use policy_adapter_storage::{ConnectStore, ConnectionOptions, RuleStore, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::{
    Adapter, AdapterConfig, AdapterError, AdapterOptions, BatchAdapter, FilteredAdapter,
    UpdatableAdapter,
};

/// Run a store call, failing with [`StorageError::Timeout`] once `timeout` elapses
async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(timeout)),
    }
}

/// Policy adapter backed by a [`RuleStore`]
///
/// Release the connection with [`DocumentAdapter::close`]. Loads take
/// `&mut self`, so concurrent loads on one handle are not possible; writes
/// take `&self` and may run concurrently.
#[derive(Debug)]
pub struct DocumentAdapter<S: RuleStore> {
    store: Option<S>,
    database: String,
    timeout: Duration,
    updatable: bool,
    filtered: bool,
}

impl<S: ConnectStore> DocumentAdapter<S> {
    /// Connect to `target` with default options.
    ///
    /// The database embedded in the target is used, `casbin_rule` when it
    /// names none.
    pub async fn new(target: &str) -> Result<Self, AdapterError> {
        Self::with_options(target, AdapterOptions::default()).await
    }

    /// Connect to `target` with explicit options
    pub async fn with_options(target: &str, options: AdapterOptions) -> Result<Self, AdapterError> {
        let connection = ConnectionOptions::parse(target, S::DEFAULT_SCHEME)
            .map_err(|source| AdapterError::Connection { source })?;
        Self::with_connection_options(connection, options).await
    }

    /// Connect from pre-built connection options
    pub async fn with_connection_options(
        connection: ConnectionOptions,
        options: AdapterOptions,
    ) -> Result<Self, AdapterError> {
        let database = options
            .database
            .clone()
            .or_else(|| connection.database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let store = with_timeout(options.timeout, S::connect(&connection, &database))
            .await
            .map_err(|source| AdapterError::Connection { source })?;

        Self::open(
            store,
            AdapterOptions {
                database: Some(database),
                ..options
            },
        )
        .await
    }

    /// Connect using environment-driven configuration
    pub async fn from_config(config: &AdapterConfig) -> Result<Self, AdapterError> {
        Self::with_options(&config.url, config.options()).await
    }
}

impl<S: RuleStore> DocumentAdapter<S> {
    /// Wrap an already connected store and declare the unique rule index
    pub async fn open(store: S, options: AdapterOptions) -> Result<Self, AdapterError> {
        with_timeout(options.timeout, store.ensure_unique_index(&RULE_KEY_FIELDS))
            .await
            .map_err(|source| AdapterError::Connection { source })?;

        let database = options
            .database
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        tracing::info!(
            "Opened policy adapter on database {} (timeout {:?}, updatable: {})",
            database,
            options.timeout,
            options.updatable
        );

        Ok(Self {
            store: Some(store),
            database,
            timeout: options.timeout,
            updatable: options.updatable,
            filtered: options.filtered,
        })
    }

    /// Release the connection
    pub async fn close(mut self) -> Result<(), AdapterError> {
        let Some(store) = self.store.take() else {
            return Ok(());
        };

        with_timeout(self.timeout, store.close())
            .await
            .map_err(|source| AdapterError::Store { op: "close", source })?;

        tracing::info!("Closed policy adapter on database {}", self.database);
        Ok(())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    fn backend(&self) -> Result<&S, AdapterError> {
        self.store
            .as_ref()
            .ok_or_else(|| AdapterError::State("adapter is closed".to_string()))
    }

    async fn load(
        &mut self,
        op: &'static str,
        model: &mut dyn Model,
        selector: Option<&S::Selector>,
    ) -> Result<(), AdapterError> {
        self.filtered = selector.is_some();
        let store = self.backend()?;

        let loaded = with_timeout(self.timeout, async {
            let mut rows = store.find(selector).await?;
            let mut count = 0usize;
            while let Some(row) = rows.next().await {
                let rule = row?;
                let added = load_policy_rule(&rule, model)
                    .map_err(|e| StorageError::Decode(e.to_string()))?;
                if added {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
        .map_err(|source| AdapterError::query(op, source))?;

        tracing::debug!("Loaded {} rules from {} ({})", loaded, self.database, op);
        Ok(())
    }

    async fn drop_and_reindex(&self, op: &'static str) -> Result<(), AdapterError> {
        let store = self.backend()?;
        with_timeout(self.timeout, store.drop_collection())
            .await
            .map_err(|source| AdapterError::store(op, source))?;
        with_timeout(self.timeout, store.ensure_unique_index(&RULE_KEY_FIELDS))
            .await
            .map_err(|source| AdapterError::store(op, source))
    }
}

impl<S: RuleStore> Drop for DocumentAdapter<S> {
    fn drop(&mut self) {
        if self.store.is_some() {
            tracing::warn!(
                "Policy adapter on database {} dropped without close",
                self.database
            );
        }
    }
}

#[async_trait]
impl<S: RuleStore> Adapter for DocumentAdapter<S> {
    async fn load_policy(&mut self, model: &mut dyn Model) -> Result<(), AdapterError> {
        self.load("load_policy", model, None).await
    }

    async fn save_policy(&self, model: &dyn Model) -> Result<(), AdapterError> {
        if self.filtered {
            return Err(AdapterError::State(
                "cannot save a filtered policy".to_string(),
            ));
        }

        let mut lines = Vec::new();
        for group in model.policy_groups() {
            for rule in group.rules {
                lines.push(CasbinRule::from_policy(group.ptype, rule)?);
            }
        }

        self.drop_and_reindex("save_policy").await?;
        if lines.is_empty() {
            tracing::info!("Saved empty policy to {}", self.database);
            return Ok(());
        }

        let store = self.backend()?;
        let saved = with_timeout(self.timeout, store.insert_many(&lines))
            .await
            .map_err(|source| AdapterError::store("save_policy", source))?;

        tracing::info!("Saved {} rules to {}", saved, self.database);
        Ok(())
    }

    async fn clear_policy(&self) -> Result<(), AdapterError> {
        self.drop_and_reindex("clear_policy").await?;
        tracing::info!("Cleared all rules from {}", self.database);
        Ok(())
    }

    async fn add_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        let line = CasbinRule::from_policy(ptype, rule)?;
        let store = self.backend()?;

        let id = with_timeout(self.timeout, store.insert_one(&line))
            .await
            .map_err(|source| AdapterError::store("add_policy", source))?;

        tracing::debug!("Added {} rule as {}", ptype, id);
        Ok(())
    }

    async fn remove_policy(&self, _sec: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        let line = CasbinRule::from_policy(ptype, rule)?;
        let store = self.backend()?;

        let removed = with_timeout(self.timeout, store.delete_one(&line.key_filter()))
            .await
            .map_err(|source| AdapterError::store("remove_policy", source))?;

        tracing::debug!("Removed {} {} rule(s)", removed, ptype);
        Ok(())
    }

    async fn remove_filtered_policy(
        &self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<(), AdapterError> {
        if field_index >= MAX_FIELDS {
            return Err(CoreError::FieldIndexOutOfRange(field_index).into());
        }

        let filter = RuleFilter::partial(ptype, field_index, field_values);
        let store = self.backend()?;

        let removed = with_timeout(self.timeout, store.delete_many(&filter))
            .await
            .map_err(|source| AdapterError::store("remove_filtered_policy", source))?;

        tracing::debug!(
            "Removed {} {} rule(s) matching {} field(s) from index {}",
            removed,
            ptype,
            filter.len() - 1,
            field_index
        );
        Ok(())
    }
}

#[async_trait]
impl<S: RuleStore> FilteredAdapter for DocumentAdapter<S> {
    type Filter = S::Selector;

    async fn load_filtered_policy(
        &mut self,
        model: &mut dyn Model,
        filter: Option<&S::Selector>,
    ) -> Result<(), AdapterError> {
        match filter {
            Some(selector) => self.load("load_filtered_policy", model, Some(selector)).await,
            None => self.load("load_policy", model, None).await,
        }
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }
}

#[async_trait]
impl<S: RuleStore> UpdatableAdapter for DocumentAdapter<S> {
    async fn update_policy(
        &self,
        _sec: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<(), AdapterError> {
        if !self.updatable {
            return Err(AdapterError::State(
                "cannot save updated policy: adapter was not opened as updatable".to_string(),
            ));
        }

        let old_line = CasbinRule::from_policy(ptype, old_rule)?;
        let new_line = CasbinRule::from_policy(ptype, new_rule)?;
        let store = self.backend()?;

        let matched = with_timeout(
            self.timeout,
            store.update_one(&old_line.key_filter(), &new_line),
        )
        .await
        .map_err(|source| AdapterError::store("update_policy", source))?;

        tracing::debug!("Updated {} {} rule(s)", matched, ptype);
        Ok(())
    }
}

#[async_trait]
impl<S: RuleStore> BatchAdapter for DocumentAdapter<S> {
    async fn add_policies(&self, _sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        let lines = rules
            .iter()
            .map(|rule| CasbinRule::from_policy(ptype, rule))
            .collect::<Result<Vec<_>, CoreError>>()?;
        if lines.is_empty() {
            return Ok(());
        }
        let store = self.backend()?;

        let added = with_timeout(self.timeout, store.insert_many(&lines))
            .await
            .map_err(|source| AdapterError::store("add_policies", source))?;

        tracing::debug!("Added {} {} rules", added, ptype);
        Ok(())
    }

    async fn remove_policies(&self, _sec: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        let lines = rules
            .iter()
            .map(|rule| CasbinRule::from_policy(ptype, rule))
            .collect::<Result<Vec<_>, CoreError>>()?;
        let store = self.backend()?;

        let mut removed = 0;
        for line in &lines {
            removed += with_timeout(self.timeout, store.delete_one(&line.key_filter()))
                .await
                .map_err(|source| AdapterError::store("remove_policies", source))?;
        }

        tracing::debug!("Removed {} {} rules", removed, ptype);
        Ok(())
    }
}
