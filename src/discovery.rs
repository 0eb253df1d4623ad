//! Peer discovery through DNS SRV records.
//!
//! Every pod behind the headless service is published as an SRV target.  The
//! record to query is either configured explicitly or derived from this
//! pod's own FQDN by replacing its unique first label with the
//! `_couchdb._tcp` service prefix.
//!
//! A discovery round is only usable once it is complete: when an expected
//! replica count is configured the answer must match it, and every pod with
//! a lower ordinal than ours must already be visible.  Both checks fail
//! retryably, because SRV records propagate asynchronously while the set
//! starts up.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use hickory_resolver::TokioAsyncResolver;
use tracing::info;

use crate::config::Config;
use crate::coordinator::pod_ordinal;
use crate::errors::BootstrapError;
use crate::retry::{with_backoff, BackoffPolicy};

/// A peer pod's resolvable FQDN, with the absolute-name trailing dot
/// stripped (Erlang node names must not carry it).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Build from an SRV answer's target name.
    pub fn from_srv_target(target: &str) -> Self {
        Self(target.trim_end_matches('.').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pod's StatefulSet ordinal, parsed from the first DNS label.
    pub fn ordinal(&self) -> Option<u32> {
        let label = self.0.split('.').next()?;
        pod_ordinal(label)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The SRV record to query: the configured override, or the pod FQDN with
/// its first label replaced by `_couchdb._tcp`.
pub fn service_record(config: &Config) -> Result<String, BootstrapError> {
    if let Some(record) = &config.discovery.srv_record {
        return Ok(record.clone());
    }
    let mut labels = config.node.fqdn.split('.');
    let _own = labels.next();
    let domain: Vec<&str> = labels.collect();
    if domain.is_empty() {
        return Err(BootstrapError::Config(format!(
            "cannot derive an SRV record from node FQDN {:?}; set SRV_RECORD or discovery.srv_record",
            config.node.fqdn
        )));
    }
    Ok(format!("_couchdb._tcp.{}", domain.join(".")))
}

/// Source of the current peer set.  Production uses [`SrvPeerSource`]; tests
/// substitute a fixed list.
pub trait PeerSource: Send + Sync {
    /// Resolve the current set of peer addresses, deduplicated.
    fn resolve(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PeerAddress>, BootstrapError>> + Send + '_>>;
}

/// SRV-backed peer source using the system resolver configuration.
pub struct SrvPeerSource {
    resolver: TokioAsyncResolver,
    record: String,
    policy: BackoffPolicy,
}

impl SrvPeerSource {
    /// Build a resolver from `/etc/resolv.conf` for the given SRV record.
    pub fn from_system_conf(record: String, policy: BackoffPolicy) -> Result<Self, BootstrapError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            BootstrapError::Config(format!("failed to read system resolver configuration: {e}"))
        })?;
        Ok(Self {
            resolver,
            record,
            policy,
        })
    }
}

impl PeerSource for SrvPeerSource {
    fn resolve(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PeerAddress>, BootstrapError>> + Send + '_>> {
        Box::pin(async move {
            info!("Resolving SRV record {}", self.record);
            let answers = with_backoff(&self.policy, "SRV lookup", || async {
                self.resolver.srv_lookup(self.record.as_str()).await
            })
            .await
            .map_err(|e| BootstrapError::Discovery {
                record: self.record.clone(),
                reason: e.to_string(),
            })?;

            let unique: BTreeSet<PeerAddress> = answers
                .iter()
                .map(|srv| PeerAddress::from_srv_target(&srv.target().to_utf8()))
                .collect();
            let peers: Vec<PeerAddress> = unique.into_iter().collect();
            info!(
                "Discovered {} peer(s) from {}: {:?}",
                peers.len(),
                self.record,
                peers.iter().map(PeerAddress::as_str).collect::<Vec<_>>()
            );
            Ok(peers)
        })
    }
}

/// Validate that a discovery round is complete enough to act on.
///
/// Incomplete rounds are retryable: the bootstrap loop backs off and
/// re-resolves rather than joining a partial group.
pub fn check_group(
    peers: &[PeerAddress],
    own_ordinal: Option<u32>,
    expected_peers: Option<usize>,
) -> Result<(), BootstrapError> {
    if let Some(expected) = expected_peers {
        if peers.len() != expected {
            return Err(BootstrapError::IncompleteGroup {
                found: peers.len(),
                expected,
            });
        }
    }
    // Every pod below our ordinal must be visible before we join anything.
    // Otherwise pods 1 and 2 can converge among themselves while pod 0's
    // record is still propagating, and finalization runs against a group
    // that never registered pod 0.
    if let Some(own) = own_ordinal {
        let found: BTreeSet<u32> = peers.iter().filter_map(PeerAddress::ordinal).collect();
        let missing: Vec<u32> = (0..own).filter(|n| !found.contains(n)).collect();
        if !missing.is_empty() {
            return Err(BootstrapError::MissingOrdinals { missing });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn peer(name: &str) -> PeerAddress {
        PeerAddress::from_srv_target(name)
    }

    #[test]
    fn test_trailing_dot_stripped() {
        let p = peer("couchdb-0.couchdb.default.svc.cluster.local.");
        assert_eq!(p.as_str(), "couchdb-0.couchdb.default.svc.cluster.local");
    }

    #[test]
    fn test_ordinal_from_first_label() {
        assert_eq!(peer("couchdb-2.couchdb.default.svc.cluster.local").ordinal(), Some(2));
        assert_eq!(peer("couchdb-0.couchdb.default.svc.cluster.local").ordinal(), Some(0));
        assert_eq!(peer("gateway.default.svc.cluster.local").ordinal(), None);
    }

    #[test]
    fn test_service_record_derived_from_fqdn() {
        let mut config = Config::default();
        config.node.fqdn = "couchdb-1.couchdb.default.svc.cluster.local".to_string();
        assert_eq!(
            service_record(&config).unwrap(),
            "_couchdb._tcp.couchdb.default.svc.cluster.local"
        );
    }

    #[test]
    fn test_service_record_override_wins() {
        let mut config = Config::default();
        config.node.fqdn = "couchdb-1.couchdb.default.svc.cluster.local".to_string();
        config.discovery.srv_record = Some("_couchdb._tcp.elsewhere.example".to_string());
        assert_eq!(
            service_record(&config).unwrap(),
            "_couchdb._tcp.elsewhere.example"
        );
    }

    #[test]
    fn test_service_record_requires_a_domain() {
        let mut config = Config::default();
        config.node.fqdn = "couchdb-1".to_string();
        assert!(matches!(
            service_record(&config),
            Err(BootstrapError::Config(_))
        ));
    }

    #[test]
    fn test_check_group_passes_without_constraints() {
        // Two peers, no expected size configured: proceed directly.
        let peers = vec![
            peer("a-0.svc.cluster.local"),
            peer("a-1.svc.cluster.local"),
        ];
        assert!(check_group(&peers, Some(1), None).is_ok());
    }

    #[test]
    fn test_check_group_expected_size_mismatch_is_retryable() {
        let peers = vec![peer("a-0.svc.cluster.local")];
        let err = check_group(&peers, Some(0), Some(3)).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            BootstrapError::IncompleteGroup {
                found: 1,
                expected: 3
            }
        ));
    }

    #[test]
    fn test_check_group_missing_lower_ordinals() {
        // Pod 2 sees itself and pod 1, but pod 0 has not propagated yet.
        let peers = vec![
            peer("a-1.svc.cluster.local"),
            peer("a-2.svc.cluster.local"),
        ];
        let err = check_group(&peers, Some(2), None).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, BootstrapError::MissingOrdinals { missing } if missing == vec![0]));
    }

    #[test]
    fn test_check_group_ordinal_zero_has_no_lower_peers() {
        let peers = vec![peer("a-0.svc.cluster.local")];
        assert!(check_group(&peers, Some(0), None).is_ok());
    }

    #[test]
    fn test_check_group_skips_coverage_without_own_ordinal() {
        let peers = vec![peer("a-1.svc.cluster.local")];
        assert!(check_group(&peers, None, None).is_ok());
    }
}
