//! Idempotent registration of discovered peers on the local node.
//!
//! Two transient failure modes get deliberately different treatment.  A 404
//! means the node-local `_nodes` database is still initializing; that is
//! waited out on a fixed interval without an attempt cap, since the node
//! always reaches it eventually.  Transport failures use the bounded
//! exponential envelope, and exhausting it fails this bootstrap attempt.

use std::time::Duration;

use tracing::{info, warn};

use crate::admin::{AdminClient, JoinOutcome};
use crate::discovery::PeerAddress;
use crate::errors::BootstrapError;
use crate::retry::BackoffPolicy;

/// Registers peers against the local node with retry handling.
pub struct JoinDriver<'a> {
    admin: &'a AdminClient,
    policy: BackoffPolicy,
    /// Fixed wait while the local `_nodes` database initializes.
    not_ready_interval: Duration,
}

impl<'a> JoinDriver<'a> {
    pub fn new(admin: &'a AdminClient, policy: BackoffPolicy, not_ready_interval: Duration) -> Self {
        Self {
            admin,
            policy,
            not_ready_interval,
        }
    }

    /// Register every discovered peer in turn.
    pub async fn join_all(&self, peers: &[PeerAddress]) -> Result<(), BootstrapError> {
        for peer in peers {
            self.join(peer).await?;
        }
        Ok(())
    }

    /// Register one peer.  Succeeds on created and already-member alike;
    /// calling this twice for the same peer never errors and never
    /// duplicates membership.
    pub async fn join(&self, peer: &PeerAddress) -> Result<(), BootstrapError> {
        info!("Adding cluster node {} to this pod's CouchDB", peer);
        let mut attempt = 1u32;
        loop {
            match self.admin.register_node(peer).await {
                Ok(JoinOutcome::Created) => {
                    info!("Registered {}", peer);
                    return Ok(());
                }
                Ok(JoinOutcome::AlreadyMember) => {
                    info!("{} is already a member", peer);
                    return Ok(());
                }
                Ok(JoinOutcome::NotYetReady) => {
                    info!(
                        "Local _nodes database not initialized yet; retrying {} in {:.1}s",
                        peer,
                        self.not_ready_interval.as_secs_f64()
                    );
                    tokio::time::sleep(self.not_ready_interval).await;
                }
                Ok(JoinOutcome::Rejected(status)) => {
                    return Err(BootstrapError::Join {
                        peer: peer.to_string(),
                        reason: format!("registration rejected with HTTP {status}"),
                    });
                }
                Err(e) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "CouchDB not responding while registering {} (attempt {}/{}): {}; backing off {:.1}s",
                        peer,
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BootstrapError::Join {
                        peer: peer.to_string(),
                        reason: format!("{e} (after {attempt} attempts)"),
                    });
                }
            }
        }
    }
}
