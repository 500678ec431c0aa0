//! Adapter configuration

use std::time::Duration;

use crate::AdapterError;

/// Bound applied to every store round trip unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction options for a [`DocumentAdapter`](crate::DocumentAdapter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Database to use; overrides one embedded in the connection target
    pub database: Option<String>,
    /// Per-operation timeout
    pub timeout: Duration,
    /// Allow `update_policy`
    pub updatable: bool,
    /// Start with the filtered flag set, refusing saves until a full load
    pub filtered: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            database: None,
            timeout: DEFAULT_TIMEOUT,
            updatable: false,
            filtered: false,
        }
    }
}

impl AdapterOptions {
    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }
}

/// Environment-driven configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Connection target; the backend supplies the scheme when omitted
    pub url: String,
    pub database: Option<String>,
    pub timeout_secs: u64,
    pub updatable: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            url: "localhost".to_string(),
            database: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            updatable: false,
        }
    }
}

impl AdapterConfig {
    pub const URL_VAR: &'static str = "POLICY_STORE_URL";
    pub const DATABASE_VAR: &'static str = "POLICY_STORE_DATABASE";
    pub const TIMEOUT_VAR: &'static str = "POLICY_STORE_TIMEOUT_SECS";
    pub const UPDATABLE_VAR: &'static str = "POLICY_STORE_UPDATABLE";

    /// Read configuration from `POLICY_STORE_*` environment variables
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let url = lookup(Self::URL_VAR)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.url);
        let database = lookup(Self::DATABASE_VAR).filter(|db| !db.trim().is_empty());

        let timeout_secs = match lookup(Self::TIMEOUT_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(AdapterError::Config(format!(
                        "{} must be a positive number of seconds, got `{}`",
                        Self::TIMEOUT_VAR,
                        raw
                    )))
                }
            },
            None => defaults.timeout_secs,
        };

        let updatable = match lookup(Self::UPDATABLE_VAR) {
            Some(raw) => parse_flag(Self::UPDATABLE_VAR, &raw)?,
            None => defaults.updatable,
        };

        Ok(Self {
            url,
            database,
            timeout_secs,
            updatable,
        })
    }

    pub fn options(&self) -> AdapterOptions {
        AdapterOptions {
            database: self.database.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            updatable: self.updatable,
            filtered: false,
        }
    }
}

fn parse_flag(var: &str, raw: &str) -> Result<bool, AdapterError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AdapterError::Config(format!(
            "{} must be a boolean, got `{}`",
            var, raw
        ))),
    }
}
