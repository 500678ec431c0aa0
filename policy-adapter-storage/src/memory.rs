//! In-process document store for development and testing
//!
//! Documents are kept as JSON values and decoded into records on read, so a
//! malformed document surfaces the same way it would from a real backend.

use async_trait::async_trait;
use policy_adapter_core::{CasbinRule, RuleFilter, ID_FIELD, PTYPE_FIELD, VALUE_FIELDS};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{ConnectStore, ConnectionOptions, RuleStore, RuleStream, StorageError};

/// Databases opened through `memory://` targets, shared per process.
///
/// Entries live until the process exits, like databases on a server:
/// closing every handle keeps the data for the next `connect` to the same
/// target. Use [`InMemoryRuleStore::new`] for a store that is freed with its
/// last handle.
static DATABASES: LazyLock<Mutex<HashMap<String, InMemoryRuleStore>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Value>,
    unique_indexes: Vec<Vec<String>>,
}

impl Collection {
    /// Unique index violated by `document`, ignoring the document at `skip`
    fn conflict(&self, document: &Value, skip: Option<usize>) -> Option<String> {
        self.unique_indexes.iter().find_map(|fields| {
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, existing)| same_key(fields, existing, document));
            clash.then(|| format!("duplicate key on ({})", fields.join(", ")))
        })
    }

    fn insert(&mut self, mut document: Value) -> Result<String, StorageError> {
        let object = document
            .as_object_mut()
            .ok_or_else(|| StorageError::Internal("document must be an object".to_string()))?;
        let assigned = match object.get(ID_FIELD) {
            Some(Value::String(id)) => Some(id.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        let id = match assigned {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                object.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        if self.documents.iter().any(|existing| existing.get(ID_FIELD) == document.get(ID_FIELD)) {
            return Err(StorageError::AlreadyExists(format!("duplicate key on (_id): {}", id)));
        }
        if let Some(conflict) = self.conflict(&document, None) {
            return Err(StorageError::AlreadyExists(conflict));
        }

        self.documents.push(document);
        Ok(id)
    }
}

fn same_key(fields: &[String], a: &Value, b: &Value) -> bool {
    fields.iter().all(|field| a.get(field) == b.get(field))
}

fn to_document(rule: &CasbinRule) -> Result<Value, StorageError> {
    Ok(serde_json::to_value(rule.without_id())?)
}

fn decode(document: Value) -> Result<CasbinRule, StorageError> {
    serde_json::from_value(document).map_err(|e| StorageError::Decode(e.to_string()))
}

/// In-memory rule collection
///
/// Clones share the same collection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    collection: Arc<RwLock<Collection>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw document as-is, assigning `_id` if it has none
    pub async fn insert_document(&self, document: Value) -> Result<String, StorageError> {
        self.collection.write().await.insert(document)
    }

    /// Snapshot of every stored document
    pub async fn documents(&self) -> Vec<Value> {
        self.collection.read().await.documents.clone()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.collection.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Field lists of the declared unique indexes
    pub async fn unique_indexes(&self) -> Vec<Vec<String>> {
        self.collection.read().await.unique_indexes.clone()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    type Selector = RuleFilter;

    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), StorageError> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut collection = self.collection.write().await;
        if collection.unique_indexes.contains(&fields) {
            return Ok(());
        }

        let documents = &collection.documents;
        for (position, document) in documents.iter().enumerate() {
            if documents[position + 1..]
                .iter()
                .any(|other| same_key(&fields, document, other))
            {
                return Err(StorageError::AlreadyExists(format!(
                    "cannot build unique index on ({}): duplicate key",
                    fields.join(", ")
                )));
            }
        }

        tracing::debug!("Created unique index on ({})", fields.join(", "));
        collection.unique_indexes.push(fields);
        Ok(())
    }

    async fn find(&self, selector: Option<&RuleFilter>) -> Result<RuleStream<'_>, StorageError> {
        let matched: Vec<Value> = {
            let collection = self.collection.read().await;
            collection
                .documents
                .iter()
                .filter(|document| selector.map_or(true, |filter| filter.matches_document(document)))
                .cloned()
                .collect()
        };

        Ok(Box::pin(tokio_stream::iter(matched.into_iter().map(decode))))
    }

    async fn insert_one(&self, rule: &CasbinRule) -> Result<String, StorageError> {
        let document = to_document(rule)?;
        self.collection.write().await.insert(document)
    }

    async fn insert_many(&self, rules: &[CasbinRule]) -> Result<usize, StorageError> {
        let mut collection = self.collection.write().await;
        for rule in rules {
            collection.insert(to_document(rule)?)?;
        }
        Ok(rules.len())
    }

    async fn delete_one(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        let mut collection = self.collection.write().await;
        match collection
            .documents
            .iter()
            .position(|document| filter.matches_document(document))
        {
            Some(position) => {
                collection.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        let mut collection = self.collection.write().await;
        let before = collection.documents.len();
        collection
            .documents
            .retain(|document| !filter.matches_document(document));
        Ok((before - collection.documents.len()) as u64)
    }

    async fn update_one(&self, filter: &RuleFilter, update: &CasbinRule) -> Result<u64, StorageError> {
        let mut collection = self.collection.write().await;
        let Some(position) = collection
            .documents
            .iter()
            .position(|document| filter.matches_document(document))
        else {
            return Ok(0);
        };

        let mut document = collection.documents[position].clone();
        let object: &mut Map<String, Value> = document
            .as_object_mut()
            .ok_or_else(|| StorageError::Internal("stored document is not an object".to_string()))?;
        object.insert(PTYPE_FIELD.to_string(), Value::String(update.ptype.clone()));
        for (field, value) in VALUE_FIELDS.iter().zip(update.values()) {
            object.insert(field.to_string(), Value::String(value.to_string()));
        }

        if let Some(conflict) = collection.conflict(&document, Some(position)) {
            return Err(StorageError::AlreadyExists(conflict));
        }

        collection.documents[position] = document;
        Ok(1)
    }

    async fn drop_collection(&self) -> Result<(), StorageError> {
        let mut collection = self.collection.write().await;
        collection.documents.clear();
        collection.unique_indexes.clear();
        Ok(())
    }

    async fn close(self) -> Result<(), StorageError> {
        tracing::debug!("Closed in-memory rule store");
        Ok(())
    }
}

#[async_trait]
impl ConnectStore for InMemoryRuleStore {
    const DEFAULT_SCHEME: &'static str = "memory";

    async fn connect(options: &ConnectionOptions, database: &str) -> Result<Self, StorageError> {
        if options.scheme != Self::DEFAULT_SCHEME {
            return Err(StorageError::Connection(format!(
                "unsupported scheme `{}` for the in-memory store",
                options.scheme
            )));
        }
        if let Some((key, _)) = options.params.first() {
            return Err(StorageError::Connection(format!(
                "unsupported connection option `{}`",
                key
            )));
        }

        let name = format!("{}/{}", options.hosts.join(","), database);
        let mut databases = DATABASES
            .lock()
            .map_err(|_| StorageError::Internal("in-memory database registry poisoned".to_string()))?;
        let store = databases.entry(name.clone()).or_default().clone();

        tracing::info!("Connected to in-memory database {}", name);
        Ok(store)
    }
}
