//! Adapter error types

use policy_adapter_core::CoreError;
use policy_adapter_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Failed to open policy store: {source}")]
    Connection {
        #[source]
        source: StorageError,
    },

    #[error("Query failed in {op}: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Rule already stored ({op}): {source}")]
    Conflict {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Operation not allowed: {0}")]
    State(String),

    #[error("Store error in {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid rule: {0}")]
    Core(#[from] CoreError),
}

/// Coarse classification of an [`AdapterError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Query,
    Conflict,
    State,
    Store,
    Config,
    Invalid,
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Connection { .. } => ErrorKind::Connection,
            AdapterError::Query { .. } => ErrorKind::Query,
            AdapterError::Conflict { .. } => ErrorKind::Conflict,
            AdapterError::State(_) => ErrorKind::State,
            AdapterError::Store { .. } => ErrorKind::Store,
            AdapterError::Config(_) => ErrorKind::Config,
            AdapterError::Core(_) => ErrorKind::Invalid,
        }
    }

    /// Whether the underlying store gave up waiting
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AdapterError::Store {
                source: StorageError::Timeout(_),
                ..
            }
        )
    }

    /// Failure of a write or other non-load store call
    pub(crate) fn store(op: &'static str, source: StorageError) -> Self {
        match source {
            StorageError::AlreadyExists(_) => AdapterError::Conflict { op, source },
            source => AdapterError::Store { op, source },
        }
    }

    /// Failure while querying or decoding during a load
    pub(crate) fn query(op: &'static str, source: StorageError) -> Self {
        match source {
            StorageError::Timeout(_) => AdapterError::Store { op, source },
            source => AdapterError::Query { op, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_duplicate_insert_maps_to_conflict() {
        let err = AdapterError::store("add_policy", StorageError::AlreadyExists("dup".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("add_policy"));
    }

    #[test]
    fn test_load_timeout_stays_a_store_error() {
        let err = AdapterError::query("load_policy", StorageError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.is_timeout());

        let err = AdapterError::query("load_policy", StorageError::Decode("bad row".into()));
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(!err.is_timeout());
    }
}
