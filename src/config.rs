//! Configuration loading and types for couchboot.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct, then overridden from the environment variables the
//! StatefulSet manifest sets on every pod (`HOSTNAME`, `SRV_RECORD`,
//! `COUCHDB_USER`, `COUCHDB_PASSWORD`, `COUCHDB_CLUSTER_SIZE`).

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// This pod's identity.
    #[serde(default)]
    pub node: NodeConfig,

    /// Local CouchDB admin API settings.
    #[serde(default)]
    pub couchdb: CouchDbConfig,

    /// Peer discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Retry and polling intervals.
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Pod identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Pod name, e.g. `couchdb-1`.  The trailing `-<n>` suffix is the
    /// StatefulSet ordinal used for coordinator election and discovery
    /// completeness checks.
    #[serde(default)]
    pub name: String,

    /// Pod FQDN, e.g. `couchdb-1.couchdb.default.svc.cluster.local`.
    /// Used to derive the SRV record when none is configured.
    #[serde(default)]
    pub fqdn: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            fqdn: String::new(),
        }
    }
}

/// Local CouchDB admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CouchDbConfig {
    /// Erlang node name prefix: members are registered as `<prefix>@<fqdn>`.
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// Node-local admin port carrying the `_nodes` database.
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// Clustered API port carrying `_membership` and `_cluster_setup`.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Admin username.  Absent means requests go out unauthenticated.
    #[serde(default)]
    pub username: Option<String>,

    /// Admin password.
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for CouchDbConfig {
    fn default() -> Self {
        Self {
            node_prefix: default_node_prefix(),
            local_port: default_local_port(),
            api_port: default_api_port(),
            username: None,
            password: None,
        }
    }
}

/// Peer discovery configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Explicit SRV record to query.  When unset the record is derived from
    /// the pod FQDN by dropping its first label and prepending
    /// `_couchdb._tcp`.
    #[serde(default)]
    pub srv_record: Option<String>,

    /// Expected replica count.  When set, a discovery round that returns a
    /// different number of peers is retried.
    #[serde(default)]
    pub expected_peers: Option<usize>,
}

/// Retry and polling intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Delay between non-converged rounds, seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Fixed wait while the local `_nodes` database initializes, seconds.
    #[serde(default = "default_join_retry_interval")]
    pub join_retry_interval_secs: u64,

    /// Bounded-retry ceiling for individual network calls.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay for retried network calls, milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            join_retry_interval_secs: default_join_retry_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_node_prefix() -> String {
    "couchdb".to_string()
}

fn default_local_port() -> u16 {
    5986
}

fn default_api_port() -> u16 {
    5984
}

fn default_poll_interval() -> u64 {
    5
}

fn default_join_retry_interval() -> u64 {
    2
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff_base_ms() -> u64 {
    1000
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Override fields from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Environment override logic, parameterized over the variable source so
    /// it can be tested without mutating the process environment.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(hostname) = get("HOSTNAME") {
            if self.node.name.is_empty() {
                self.node.name = hostname.clone();
            }
            if self.node.fqdn.is_empty() {
                self.node.fqdn = hostname;
            }
        }
        if let Some(record) = get("SRV_RECORD") {
            self.discovery.srv_record = Some(record);
        }
        if let Some(user) = get("COUCHDB_USER") {
            self.couchdb.username = Some(user);
        }
        if let Some(password) = get("COUCHDB_PASSWORD") {
            self.couchdb.password = Some(password);
        }
        if let Some(size) = get("COUCHDB_CLUSTER_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.discovery.expected_peers = Some(n),
                Err(_) => {
                    tracing::warn!("Ignoring unparseable COUCHDB_CLUSTER_SIZE={:?}", size)
                }
            }
        }
    }

    /// Admin credentials as a pair, when both halves are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.couchdb.username, &self.couchdb.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.couchdb.node_prefix, "couchdb");
        assert_eq!(config.couchdb.local_port, 5986);
        assert_eq!(config.couchdb.api_port, 5984);
        assert_eq!(config.timing.poll_interval_secs, 5);
        assert_eq!(config.timing.max_attempts, 10);
        assert!(config.discovery.srv_record.is_none());
        assert!(config.discovery.expected_peers.is_none());
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env = env_of(&[
            ("HOSTNAME", "couchdb-2.couchdb.default.svc.cluster.local"),
            ("COUCHDB_USER", "admin"),
            ("COUCHDB_PASSWORD", "s3cret"),
            ("COUCHDB_CLUSTER_SIZE", "3"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).cloned());

        assert_eq!(config.node.name, "couchdb-2.couchdb.default.svc.cluster.local");
        assert_eq!(config.discovery.expected_peers, Some(3));
        assert_eq!(
            config.credentials(),
            Some(("admin".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn test_srv_record_env_wins_over_file() {
        let mut config: Config = serde_yaml::from_str(
            "discovery:\n  srv_record: _couchdb._tcp.from-file.example\n",
        )
        .unwrap();
        let env = env_of(&[("SRV_RECORD", "_couchdb._tcp.from-env.example")]);
        config.apply_env(|k| env.get(k).cloned());
        assert_eq!(
            config.discovery.srv_record.as_deref(),
            Some("_couchdb._tcp.from-env.example")
        );
    }

    #[test]
    fn test_env_does_not_clobber_explicit_node_name() {
        let mut config = Config::default();
        config.node.name = "couchdb-0".to_string();
        let env = env_of(&[("HOSTNAME", "something-else")]);
        config.apply_env(|k| env.get(k).cloned());
        assert_eq!(config.node.name, "couchdb-0");
    }

    #[test]
    fn test_bad_cluster_size_ignored() {
        let mut config = Config::default();
        let env = env_of(&[("COUCHDB_CLUSTER_SIZE", "many")]);
        config.apply_env(|k| env.get(k).cloned());
        assert!(config.discovery.expected_peers.is_none());
    }

    #[test]
    fn test_partial_credentials_are_no_credentials() {
        let mut config = Config::default();
        config.couchdb.username = Some("admin".to_string());
        assert!(config.credentials().is_none());
    }
}
