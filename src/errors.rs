//! Bootstrap error taxonomy.
//!
//! Variants map to the failure classes of the bootstrap flow.  Retryable
//! variants (`IncompleteGroup`, `MissingOrdinals`) are consumed by the
//! bootstrap loop's discovery retry path; everything else either aborts the
//! process (`Discovery`, `Join`, `Config`) or is reported and ignored
//! (`Finalize`).

use thiserror::Error;

/// Errors surfaced by the cluster bootstrap flow.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// SRV resolution failed after exhausting bounded retries.
    #[error("peer discovery failed for SRV record {record}: {reason}")]
    Discovery { record: String, reason: String },

    /// The discovered peer count does not match the configured replica count.
    /// DNS records propagate asynchronously at startup, so this is retryable.
    #[error("discovered {found} peer(s) but the replica set is configured for {expected}")]
    IncompleteGroup { found: usize, expected: usize },

    /// DNS answers are missing pods with a lower ordinal than ours.  Joining
    /// now could let a partial group converge and finalize without pod 0.
    #[error("DNS answers are missing lower pod ordinal(s) {missing:?}")]
    MissingOrdinals { missing: Vec<u32> },

    /// Registering a peer against the local node failed after exhausting
    /// bounded retries, or was rejected outright.
    #[error("failed to register node {peer}: {reason}")]
    Join { peer: String, reason: String },

    /// The one-shot cluster finalization did not report success.  Never
    /// retried; the process idles and leaves recovery to the orchestrator.
    #[error("cluster finalization failed: {reason}")]
    Finalize { reason: String },

    /// The configuration is unusable (e.g. no SRV record and no domain to
    /// derive one from).
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BootstrapError {
    /// Whether the bootstrap loop should back off and re-run discovery
    /// instead of treating this as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BootstrapError::IncompleteGroup { .. } | BootstrapError::MissingOrdinals { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_group_is_retryable() {
        let err = BootstrapError::IncompleteGroup {
            found: 1,
            expected: 3,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_missing_ordinals_is_retryable() {
        let err = BootstrapError::MissingOrdinals { missing: vec![0] };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        let discovery = BootstrapError::Discovery {
            record: "_couchdb._tcp.db.default.svc.cluster.local".into(),
            reason: "no records found".into(),
        };
        assert!(!discovery.is_retryable());

        let join = BootstrapError::Join {
            peer: "db-1.db.default.svc.cluster.local".into(),
            reason: "connection refused".into(),
        };
        assert!(!join.is_retryable());

        let finalize = BootstrapError::Finalize {
            reason: "HTTP 400".into(),
        };
        assert!(!finalize.is_retryable());
    }
}
