//! Connection target parsing
//!
//! Targets look like
//! `[scheme://][user[:password]@]host[:port][,host[:port]...][/database][?key=value&...]`.

use std::fmt;
use url::Url;

use crate::StorageError;

/// Parsed connection target
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub scheme: String,
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database embedded in the target path
    pub database: Option<String>,
    /// Query parameters in their original order
    pub params: Vec<(String, String)>,
}

impl ConnectionOptions {
    /// Options for `scheme://host` with nothing else set
    pub fn new(scheme: &str, host: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            hosts: vec![host.to_string()],
            username: None,
            password: None,
            database: None,
            params: Vec::new(),
        }
    }

    /// Parse a connection target, prefixing `default_scheme` when it has none
    pub fn parse(target: &str, default_scheme: &str) -> Result<Self, StorageError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(StorageError::Connection("empty connection target".to_string()));
        }
        let target = if target.contains("://") {
            target.to_string()
        } else {
            format!("{}://{}", default_scheme, target)
        };

        // `Url` holds a single host, so the host list is split off and each
        // host parsed on its own
        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| invalid_target(&target, "missing scheme"))?;
        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let (userinfo, host_list) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        let hosts = host_list
            .split(',')
            .map(|host| parse_host(scheme, host.trim()))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let first = hosts
            .first()
            .ok_or_else(|| invalid_target(&target, "missing host"))?;

        let primary = match userinfo {
            Some(userinfo) => format!("{}://{}@{}{}", scheme, userinfo, first, tail),
            None => format!("{}://{}{}", scheme, first, tail),
        };
        let url = Url::parse(&primary).map_err(|e| invalid_target(&target, e))?;

        let username = match url.username() {
            "" => None,
            user => Some(decode(user)?),
        };
        let password = url.password().map(decode).transpose()?;
        let database = match url.path().trim_matches('/') {
            "" => None,
            path => Some(decode(path)?),
        };

        let params = match url.query() {
            Some(query) => {
                let malformed = query.split('&').find(|pair| {
                    !pair.is_empty() && !matches!(pair.split_once('='), Some((key, _)) if !key.is_empty())
                });
                if let Some(pair) = malformed {
                    return Err(StorageError::Connection(format!(
                        "invalid connection option `{}`",
                        pair
                    )));
                }
                url.query_pairs()
                    .map(|(key, value)| (key.into_owned(), value.into_owned()))
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            hosts,
            username,
            password,
            database,
            params,
        })
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// `scheme://hosts[?params]` without credentials or database
    pub fn endpoint(&self) -> String {
        let mut endpoint = format!("{}://{}", self.scheme, self.hosts.join(","));
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(key, value)| {
                    format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
                })
                .collect();
            endpoint.push('?');
            endpoint.push_str(&query.join("&"));
        }
        endpoint
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("scheme", &self.scheme)
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("params", &self.params)
            .finish()
    }
}

fn decode(value: &str) -> Result<String, StorageError> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| StorageError::Connection(format!("invalid percent-encoding in `{}`: {}", value, e)))
}

/// Normalized `host[:port]` for one entry of the host list
fn parse_host(scheme: &str, host: &str) -> Result<String, StorageError> {
    let url = Url::parse(&format!("{}://{}", scheme, host))
        .map_err(|e| StorageError::Connection(format!("invalid host `{}`: {}", host, e)))?;
    let name = url
        .host_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StorageError::Connection("missing host in connection target".to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", name, port),
        None => name.to_string(),
    })
}

fn invalid_target(target: &str, reason: impl fmt::Display) -> StorageError {
    StorageError::Connection(format!("invalid connection target `{}`: {}", target, reason))
}
