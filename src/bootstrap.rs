//! The bootstrap state machine.
//!
//! `Discovering -> Joining -> AwaitingConvergence` cycles until every peer's
//! membership view matches the local one, then the coordinator (and only the
//! coordinator) finalizes the cluster, and the process parks in `Idle`
//! forever.  Re-discovery between rounds is deliberate: the peer set can
//! grow while we wait, so convergence is always evaluated against a fresh
//! set, never a stale one.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::admin::AdminClient;
use crate::config::Config;
use crate::convergence;
use crate::coordinator::{pod_ordinal, CoordinatorElector};
use crate::discovery::{check_group, PeerAddress, PeerSource};
use crate::errors::BootstrapError;
use crate::join::JoinDriver;
use crate::retry::BackoffPolicy;

/// Phases of the bootstrap lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    Joining,
    AwaitingConvergence,
    Finalizing,
    Idle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Discovering => "discovering",
            Phase::Joining => "joining",
            Phase::AwaitingConvergence => "awaiting-convergence",
            Phase::Finalizing => "finalizing",
            Phase::Idle => "idle",
        };
        f.write_str(name)
    }
}

fn enter(phase: Phase) {
    info!("Entering phase: {}", phase);
}

/// Backoff policy for individual network calls, from config.
pub fn backoff_policy(config: &Config) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: config.timing.max_attempts,
        base_delay: Duration::from_millis(config.timing.backoff_base_ms),
        ..BackoffPolicy::default()
    }
}

/// Run discovery, join, and convergence until the cluster membership has
/// stabilized, then finalize on the coordinator.  Returns once the process
/// is ready to idle; fatal discovery/join failures propagate out so the
/// caller can exit non-zero for the orchestrator to restart us.
pub async fn run_until_converged(
    config: &Config,
    peer_source: &dyn PeerSource,
    admin: &AdminClient,
    elector: &dyn CoordinatorElector,
) -> Result<(), BootstrapError> {
    let own_ordinal = pod_ordinal(&config.node.name);
    let poll_interval = Duration::from_secs(config.timing.poll_interval_secs);
    let not_ready_interval = Duration::from_secs(config.timing.join_retry_interval_secs);
    let policy = backoff_policy(config);
    let joiner = JoinDriver::new(admin, policy.clone(), not_ready_interval);

    loop {
        enter(Phase::Discovering);
        let peers = discover_complete_group(config, peer_source, own_ordinal, &policy).await?;

        enter(Phase::Joining);
        joiner.join_all(&peers).await?;

        enter(Phase::AwaitingConvergence);
        if convergence::round_converged(admin, &peers, &config.node.name).await {
            info!("Cluster membership populated!");
            break;
        }
        info!(
            "Membership not yet converged; re-discovering in {}s",
            poll_interval.as_secs()
        );
        tokio::time::sleep(poll_interval).await;
    }

    if elector.is_coordinator() {
        enter(Phase::Finalizing);
        if config.credentials().is_some() {
            match admin.finalize_cluster().await {
                Ok(()) => info!("Cluster finalized. Time to relax!"),
                // Reported, never retried: repeating finish_cluster blindly
                // is unsafe.  The orchestrator restarts us if needed.
                Err(e) => error!("{}", e),
            }
        } else {
            warn!("Skipping cluster finalization: admin credentials not configured");
        }
    } else {
        info!("Not the coordinator; skipping cluster finalization");
    }

    enter(Phase::Idle);
    Ok(())
}

/// Resolve peers until the group passes its completeness checks.  Retryable
/// incompleteness (records still propagating) backs off exponentially up to
/// the policy's delay cap and re-resolves, without an attempt bound: the
/// group is expected to eventually publish every record.  Resolution failure
/// after bounded retries is fatal.
async fn discover_complete_group(
    config: &Config,
    peer_source: &dyn PeerSource,
    own_ordinal: Option<u32>,
    policy: &BackoffPolicy,
) -> Result<Vec<PeerAddress>, BootstrapError> {
    let mut attempt = 1u32;
    loop {
        let peers = peer_source.resolve().await?;
        match check_group(&peers, own_ordinal, config.discovery.expected_peers) {
            Ok(()) => return Ok(peers),
            Err(e) if e.is_retryable() => {
                let delay = policy.delay_for(attempt);
                warn!("{}; retrying discovery in {:.1}s", e, delay.as_secs_f64());
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Park forever.  The orchestrator expects the container to stay alive after
/// a successful bootstrap.
pub async fn idle() {
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Full bootstrap entrypoint: converge, finalize where applicable, idle.
/// Only ever returns with a fatal error.
pub async fn run(
    config: &Config,
    peer_source: &dyn PeerSource,
    admin: &AdminClient,
    elector: &dyn CoordinatorElector,
) -> Result<(), BootstrapError> {
    run_until_converged(config, peer_source, admin, elector).await?;
    idle().await;
    Ok(())
}
