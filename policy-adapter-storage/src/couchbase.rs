//! Couchbase storage implementation
//!
//! Rule documents live in the bucket's default collection, tagged with
//! `type = "casbin_rule"`. Couchbase has no unique secondary indexes, so the
//! key fields of each rule are guarded by a marker document keyed on a UUID v5
//! of the tuple and written with insert-if-absent semantics.

use async_trait::async_trait;
use couchbase::{
    cluster::Cluster,
    collection::Collection,
    options::{
        cluster_options::ClusterOptions,
        diagnostic_options::WaitUntilReadyOptions,
        kv_options::{InsertOptions, RemoveOptions, UpsertOptions},
        query_options::{QueryOptions, ScanConsistency},
    },
};
use tokio_stream::StreamExt;

use couchbase::authenticator::{Authenticator, PasswordAuthenticator};

use policy_adapter_core::{CasbinRule, RuleFilter, COLLECTION_NAME, DEFAULT_DATABASE, ID_FIELD};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::{ConnectStore, ConnectionOptions, RuleStore, RuleStream, StorageError};

/// Document type markers for N1QL queries
const DOC_TYPE_RULE: &str = COLLECTION_NAME;
const DOC_TYPE_RULE_KEY: &str = "casbin_rule_key";

const RULE_INDEX_NAME: &str = "idx_casbin_rule";
const RULE_KEY_INDEX_NAME: &str = "idx_casbin_rule_key";

/// Couchbase storage configuration
#[derive(Debug, Clone)]
pub struct CouchbaseConfig {
    pub connection_string: String,
    pub username: String,
    pub password: String,
    pub bucket_name: String,
}

impl Default for CouchbaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "couchbase://localhost".to_string(),
            username: "admin".to_string(),
            password: "password123".to_string(),
            bucket_name: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl CouchbaseConfig {
    /// Configuration for a parsed target; `database` names the bucket
    pub fn from_options(options: &ConnectionOptions, database: &str) -> Self {
        let defaults = Self::default();
        Self {
            connection_string: options.endpoint(),
            username: options.username.clone().unwrap_or(defaults.username),
            password: options.password.clone().unwrap_or(defaults.password),
            bucket_name: database.to_string(),
        }
    }
}

/// N1QL predicate over the rule document alias `r`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchbaseSelector {
    predicate: String,
}

impl CouchbaseSelector {
    /// Use a hand-written predicate, e.g. `r.v0 IN ["alice", "bob"]`
    pub fn raw(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
        }
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }
}

impl From<&RuleFilter> for CouchbaseSelector {
    fn from(filter: &RuleFilter) -> Self {
        if filter.is_empty() {
            return Self::raw("TRUE");
        }
        let terms: Vec<String> = filter
            .iter()
            .map(|(field, value)| format!("{} = {}", field_path(field), literal(value)))
            .collect();
        Self::raw(terms.join(" AND "))
    }
}

impl From<RuleFilter> for CouchbaseSelector {
    fn from(filter: RuleFilter) -> Self {
        Self::from(&filter)
    }
}

fn field_path(field: &str) -> String {
    if field == ID_FIELD {
        "META(r).id".to_string()
    } else {
        format!("r.`{}`", field.replace('`', ""))
    }
}

/// JSON string literals are valid N1QL string literals
fn literal(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Wrapper for documents with type field
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TypedDocument<T> {
    #[serde(rename = "type")]
    doc_type: String,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RuleKeyMarker {
    rule_id: String,
}

/// Couchbase storage for rule records
pub struct CouchbaseRuleStore {
    cluster: Arc<Cluster>,
    collection: Collection,
    bucket_name: String,
}

impl CouchbaseRuleStore {
    /// Create a new Couchbase storage instance
    pub async fn new(config: CouchbaseConfig) -> Result<Self, StorageError> {
        let authenticator = PasswordAuthenticator::new(&config.username, &config.password);
        let options = ClusterOptions::new(Authenticator::PasswordAuthenticator(authenticator));
        let cluster = Cluster::connect(&config.connection_string, options).await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to cluster: {}", e)))?;

        // Wait for cluster to be ready
        let bucket = cluster.bucket(&config.bucket_name);
        let _: () = bucket
            .wait_until_ready(WaitUntilReadyOptions::default())
            .await
            .map_err(|e: couchbase::error::Error| StorageError::Connection(format!("Failed to connect to bucket: {}", e)))?;

        let collection = bucket.default_collection();

        tracing::info!(
            "Connected to Couchbase cluster at {}, bucket: {}",
            config.connection_string,
            config.bucket_name
        );

        Ok(Self {
            cluster: Arc::new(cluster),
            collection,
            bucket_name: config.bucket_name,
        })
    }

    /// Execute a N1QL statement, keeping per-row decode failures.
    ///
    /// Reads wait for every mutation issued before them, so a rule written
    /// through the key-value API is visible to the next query.
    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        statement: &str,
    ) -> Result<Vec<Result<T, StorageError>>, StorageError> {
        let mut result = self
            .cluster
            .query(
                statement,
                QueryOptions::default().scan_consistency(ScanConsistency::RequestPlus),
            )
            .await
            .map_err(|e: couchbase::error::Error| StorageError::Query(format!("Query failed: {}", e)))?;

        let mut rows = Vec::new();
        let mut row_iter = result.rows::<T>();

        while let Some(row) = row_iter.next().await {
            rows.push(row.map_err(|e| StorageError::Decode(format!("Failed to decode row: {}", e))));
        }

        Ok(rows)
    }

    /// Execute a N1QL statement, failing on the first bad row
    async fn execute<T: serde::de::DeserializeOwned>(&self, statement: &str) -> Result<Vec<T>, StorageError> {
        self.query(statement).await?.into_iter().collect()
    }

    fn rule_where(&self, predicate: &str) -> String {
        format!(
            "r.type = {} AND r.ptype IS NOT MISSING AND ({})",
            literal(DOC_TYPE_RULE),
            predicate
        )
    }

    fn select_rules(&self, predicate: &str) -> String {
        format!(
            "SELECT META(r).id AS `_id`, r.ptype, r.v0, r.v1, r.v2, r.v3, r.v4, r.v5 FROM `{}` r WHERE {}",
            self.bucket_name,
            self.rule_where(predicate)
        )
    }

    async fn first_match(&self, filter: &RuleFilter) -> Result<Option<CasbinRule>, StorageError> {
        let statement = format!(
            "{} LIMIT 1",
            self.select_rules(CouchbaseSelector::from(filter).predicate())
        );
        let rows: Vec<CasbinRule> = self.execute(&statement).await?;
        Ok(rows.into_iter().next())
    }

    fn marker_id(rule: &CasbinRule) -> Result<String, StorageError> {
        let key = serde_json::to_vec(&(rule.ptype.as_str(), rule.values()))?;
        Ok(format!(
            "{}::{}",
            DOC_TYPE_RULE_KEY,
            Uuid::new_v5(&Uuid::NAMESPACE_OID, &key)
        ))
    }

    async fn insert_marker(&self, rule: &CasbinRule, rule_id: &str) -> Result<String, StorageError> {
        let marker_id = Self::marker_id(rule)?;
        let doc = TypedDocument {
            doc_type: DOC_TYPE_RULE_KEY.to_string(),
            data: RuleKeyMarker {
                rule_id: rule_id.to_string(),
            },
        };

        match self
            .collection
            .insert(&marker_id, &doc, InsertOptions::default())
            .await
        {
            Ok(_) => Ok(marker_id),
            Err(e) => {
                if e.to_string().contains("DocumentExists") {
                    Err(StorageError::AlreadyExists(format!(
                        "rule {} already stored",
                        rule.to_policy_line().unwrap_or_else(|| rule.ptype.clone())
                    )))
                } else {
                    Err(StorageError::Internal(format!("Failed to reserve rule key: {}", e)))
                }
            }
        }
    }

    async fn remove_document(&self, doc_id: &str) -> Result<(), StorageError> {
        match self.collection.remove(doc_id, RemoveOptions::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.to_string().contains("DocumentNotFound") {
                    Ok(())
                } else {
                    Err(StorageError::Internal(format!(
                        "Failed to remove document {}: {}",
                        doc_id, e
                    )))
                }
            }
        }
    }

    async fn write_rule(&self, doc_id: &str, rule: &CasbinRule) -> Result<(), StorageError> {
        let doc = TypedDocument {
            doc_type: DOC_TYPE_RULE.to_string(),
            data: rule.without_id(),
        };

        let _ = self
            .collection
            .upsert(doc_id, &doc, UpsertOptions::default())
            .await
            .map_err(|e| StorageError::Internal(format!("Failed to save rule: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for CouchbaseRuleStore {
    type Selector = CouchbaseSelector;

    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), StorageError> {
        let keys: Vec<String> = fields.iter().map(|f| format!("`{}`", f.replace('`', ""))).collect();
        let rule_index = format!(
            "CREATE INDEX `{}` IF NOT EXISTS ON `{}`({}) WHERE type = {}",
            RULE_INDEX_NAME,
            self.bucket_name,
            keys.join(", "),
            literal(DOC_TYPE_RULE)
        );
        let key_index = format!(
            "CREATE INDEX `{}` IF NOT EXISTS ON `{}`(rule_id) WHERE type = {}",
            RULE_KEY_INDEX_NAME,
            self.bucket_name,
            literal(DOC_TYPE_RULE_KEY)
        );

        self.execute::<Value>(&rule_index).await?;
        self.execute::<Value>(&key_index).await?;

        tracing::debug!("Ensured rule indexes on bucket {}", self.bucket_name);
        Ok(())
    }

    async fn find(&self, selector: Option<&CouchbaseSelector>) -> Result<RuleStream<'_>, StorageError> {
        let predicate = selector.map_or("TRUE", CouchbaseSelector::predicate);
        let rows: Vec<Result<CasbinRule, StorageError>> = self.query(&self.select_rules(predicate)).await?;
        Ok(Box::pin(tokio_stream::iter(rows)))
    }

    async fn insert_one(&self, rule: &CasbinRule) -> Result<String, StorageError> {
        let doc_id = format!("{}::{}", DOC_TYPE_RULE, Uuid::new_v4());
        let marker_id = self.insert_marker(rule, &doc_id).await?;

        if let Err(e) = self.write_rule(&doc_id, rule).await {
            self.remove_document(&marker_id).await?;
            return Err(e);
        }

        tracing::debug!("Saved rule {} as {}", rule.ptype, doc_id);
        Ok(doc_id)
    }

    async fn insert_many(&self, rules: &[CasbinRule]) -> Result<usize, StorageError> {
        for rule in rules {
            self.insert_one(rule).await?;
        }
        Ok(rules.len())
    }

    async fn delete_one(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        let Some(found) = self.first_match(filter).await? else {
            return Ok(0);
        };
        let Some(doc_id) = found.id.clone() else {
            return Err(StorageError::Decode("rule row without document id".to_string()));
        };

        self.remove_document(&doc_id).await?;
        self.remove_document(&Self::marker_id(&found)?).await?;
        Ok(1)
    }

    async fn delete_many(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        let statement = format!(
            "DELETE FROM `{}` r WHERE {} RETURNING META(r).id AS `_id`, r.ptype, r.v0, r.v1, r.v2, r.v3, r.v4, r.v5",
            self.bucket_name,
            self.rule_where(CouchbaseSelector::from(filter).predicate())
        );
        let removed: Vec<CasbinRule> = self.execute(&statement).await?;

        for rule in &removed {
            self.remove_document(&Self::marker_id(rule)?).await?;
        }
        Ok(removed.len() as u64)
    }

    async fn update_one(&self, filter: &RuleFilter, update: &CasbinRule) -> Result<u64, StorageError> {
        let Some(found) = self.first_match(filter).await? else {
            return Ok(0);
        };
        let Some(doc_id) = found.id.clone() else {
            return Err(StorageError::Decode("rule row without document id".to_string()));
        };

        let updated = update.without_id();

        let old_marker = Self::marker_id(&found)?;
        let new_marker = Self::marker_id(&updated)?;
        if old_marker != new_marker {
            self.insert_marker(&updated, &doc_id).await?;
        }

        if let Err(e) = self.write_rule(&doc_id, &updated).await {
            if old_marker != new_marker {
                self.remove_document(&new_marker).await?;
            }
            return Err(e);
        }

        if old_marker != new_marker {
            self.remove_document(&old_marker).await?;
        }

        tracing::debug!("Updated rule {}", doc_id);
        Ok(1)
    }

    async fn drop_collection(&self) -> Result<(), StorageError> {
        let statement = format!(
            "DELETE FROM `{}` d WHERE d.type IN [{}, {}]",
            self.bucket_name,
            literal(DOC_TYPE_RULE),
            literal(DOC_TYPE_RULE_KEY)
        );
        self.execute::<Value>(&statement).await?;

        tracing::info!("Dropped rule documents from bucket {}", self.bucket_name);
        Ok(())
    }

    async fn close(self) -> Result<(), StorageError> {
        let Self {
            cluster,
            bucket_name,
            ..
        } = self;
        drop(cluster);

        tracing::info!("Closed Couchbase connection for bucket {}", bucket_name);
        Ok(())
    }
}

#[async_trait]
impl ConnectStore for CouchbaseRuleStore {
    const DEFAULT_SCHEME: &'static str = "couchbase";

    async fn connect(options: &ConnectionOptions, database: &str) -> Result<Self, StorageError> {
        if !matches!(options.scheme.as_str(), "couchbase" | "couchbases") {
            return Err(StorageError::Connection(format!(
                "unsupported scheme `{}` for Couchbase",
                options.scheme
            )));
        }
        Self::new(CouchbaseConfig::from_options(options, database)).await
    }
}
