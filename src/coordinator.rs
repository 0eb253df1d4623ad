//! Coordinator election.
//!
//! Exactly one pod per StatefulSet may trigger cluster finalization.  The
//! orchestrator already assigns each pod a unique, stable ordinal through its
//! name (`<set>-<n>`), so election reduces to a pure check: ordinal 0 is the
//! coordinator.  The trait keeps the door open for a real election strategy.

use tracing::warn;

/// Decides whether this process is the single coordinator for the group.
pub trait CoordinatorElector: Send + Sync {
    /// True on exactly one process per group.
    fn is_coordinator(&self) -> bool;
}

/// Parse the StatefulSet ordinal from a pod name or DNS label: the integer
/// after the last `-`.  Returns `None` for names that do not follow the
/// convention.
pub fn pod_ordinal(name: &str) -> Option<u32> {
    name.rsplit('-').next()?.parse().ok()
}

/// Elects the pod whose name carries ordinal 0.
pub struct OrdinalElector {
    ordinal: Option<u32>,
}

impl OrdinalElector {
    /// Derive the role once from the pod name.
    pub fn new(node_name: &str) -> Self {
        let ordinal = pod_ordinal(node_name);
        if ordinal.is_none() {
            warn!(
                "Pod name {:?} has no parseable ordinal suffix; this process will never coordinate finalization",
                node_name
            );
        }
        Self { ordinal }
    }

    /// This pod's ordinal, when its name follows the `<set>-<n>` convention.
    pub fn ordinal(&self) -> Option<u32> {
        self.ordinal
    }
}

impl CoordinatorElector for OrdinalElector {
    fn is_coordinator(&self) -> bool {
        self.ordinal == Some(0)
    }
}
