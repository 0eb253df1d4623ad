//! Client for the CouchDB administrative HTTP API.
//!
//! Three endpoints matter for bootstrap:
//!   `PUT  {local}:5986/_nodes/couchdb@<peer>`  -- idempotent member upsert
//!   `GET  {host}:5984/_membership`             -- a node's membership view
//!   `POST {local}:5984/_cluster_setup`         -- one-shot finalization
//!
//! Requests carry basic auth when credentials are configured and go out
//! unauthenticated otherwise.

use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::PeerAddress;
use crate::errors::BootstrapError;

/// Outcome of a single member-registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The node document was created.
    Created,
    /// The node was already a member (conflict); equally a success.
    AlreadyMember,
    /// The node-local `_nodes` database has not been initialized yet.
    NotYetReady,
    /// Any other status; not safe to treat as success.
    Rejected(u16),
}

/// HTTP client over one node's administrative API.
pub struct AdminClient {
    http: reqwest::Client,
    /// Base URL of the node-local admin port, e.g. `http://127.0.0.1:5986`.
    node_base: String,
    /// Base URL of the clustered API port, e.g. `http://127.0.0.1:5984`.
    api_base: String,
    /// Clustered API port used when addressing remote peers.
    cluster_port: u16,
    /// Erlang node name prefix for member documents.
    node_prefix: String,
    credentials: Option<(String, String)>,
}

impl AdminClient {
    /// Build a client addressing the CouchDB running in this pod.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_bases(
            format!("http://127.0.0.1:{}", config.couchdb.local_port),
            format!("http://127.0.0.1:{}", config.couchdb.api_port),
            config.couchdb.api_port,
            config.couchdb.node_prefix.clone(),
            config.credentials(),
        )
    }

    /// Build a client against explicit base URLs.  Production goes through
    /// [`AdminClient::new`]; tests point this at a mock server.
    pub fn with_bases(
        node_base: String,
        api_base: String,
        cluster_port: u16,
        node_prefix: String,
        credentials: Option<(String, String)>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            http,
            node_base,
            api_base,
            cluster_port,
            node_prefix,
            credentials,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    /// Upsert `peer` as a cluster member on the local node.
    pub async fn register_node(&self, peer: &PeerAddress) -> reqwest::Result<JoinOutcome> {
        let uri = format!("{}/_nodes/{}@{}", self.node_base, self.node_prefix, peer);
        debug!("PUT {}", uri);
        let response = self.authed(self.http.put(&uri).json(&json!({}))).send().await?;
        let status = response.status();
        debug!("PUT {} -> {}", uri, status);
        Ok(match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => JoinOutcome::Created,
            StatusCode::CONFLICT => JoinOutcome::AlreadyMember,
            StatusCode::NOT_FOUND => JoinOutcome::NotYetReady,
            other => JoinOutcome::Rejected(other.as_u16()),
        })
    }

    /// The local node's membership view, or `None` when the node does not
    /// answer 200 yet.
    pub async fn local_membership(&self) -> reqwest::Result<Option<Value>> {
        self.fetch_membership(&format!("{}/_membership", self.api_base))
            .await
    }

    /// A remote peer's membership view, or `None` when the peer does not
    /// answer 200 yet.
    pub async fn peer_membership(&self, peer: &PeerAddress) -> reqwest::Result<Option<Value>> {
        self.fetch_membership(&format!("http://{}:{}/_membership", peer, self.cluster_port))
            .await
    }

    async fn fetch_membership(&self, uri: &str) -> reqwest::Result<Option<Value>> {
        let response = self.authed(self.http.get(uri)).send().await?;
        if response.status() != StatusCode::OK {
            debug!("GET {} -> {}", uri, response.status());
            return Ok(None);
        }
        let view = response.json::<Value>().await?;
        Ok(Some(view))
    }

    /// Issue the one-shot `finish_cluster` action against the local node.
    ///
    /// Never retried: repeating it after a success is rejected upstream, and
    /// repeating it blindly after a failure is unsafe.
    pub async fn finalize_cluster(&self) -> Result<(), BootstrapError> {
        let uri = format!("{}/_cluster_setup", self.api_base);
        info!("POST {} action=finish_cluster", uri);
        let response = self
            .authed(self.http.post(&uri).json(&json!({ "action": "finish_cluster" })))
            .send()
            .await
            .map_err(|e| BootstrapError::Finalize {
                reason: e.to_string(),
            })?;
        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(BootstrapError::Finalize {
                reason: format!("HTTP {} {}", status.as_u16(), body.trim()),
            });
        }

        // Read back the setup state once, purely for the logs.
        match self.authed(self.http.get(&uri)).send().await {
            Ok(check) => {
                let status = check.status();
                let state = check.json::<Value>().await.unwrap_or(Value::Null);
                info!("GET {} -> {} {}", uri, status, state);
            }
            Err(e) => debug!("Post-finalize check of {} failed: {}", uri, e),
        }
        Ok(())
    }
}
