//! Membership convergence detection.
//!
//! A bootstrap round is converged when every discovered peer reports a
//! membership view structurally equivalent to the local node's, and both
//! the peer set and the local view carry at least the two members CouchDB
//! needs to form a cluster.  View comparison ignores ordering at every
//! nesting level, since membership payloads contain unordered collections.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{info, warn};

use crate::admin::AdminClient;
use crate::discovery::PeerAddress;

/// Minimum members required to form a cluster.
const MIN_CLUSTER_NODES: usize = 2;

/// Recursively normalize a JSON value so that equivalent structures compare
/// equal regardless of ordering: objects already compare as maps, and array
/// elements are sorted by their normalized serialization.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), normalize(v)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items.iter().map(normalize).collect();
            normalized.sort_by_cached_key(|v| v.to_string());
            Value::Array(normalized)
        }
        other => other.clone(),
    }
}

/// Order-independent structural equality of two membership views.
pub fn views_equivalent(a: &Value, b: &Value) -> bool {
    normalize(a) == normalize(b)
}

/// The `cluster_nodes` member list of a view, empty when absent.
fn cluster_nodes(view: &Value) -> BTreeSet<&str> {
    view.get("cluster_nodes")
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Run one convergence round: fetch the local view and compare every peer
/// against it.  Non-convergence is a normal outcome, not an error; the
/// bootstrap loop re-discovers and calls again.
pub async fn round_converged(
    admin: &AdminClient,
    peers: &[PeerAddress],
    node_name: &str,
) -> bool {
    if peers.len() < MIN_CLUSTER_NODES {
        info!(
            "Need at least {} DNS records to form a cluster, got {}",
            MIN_CLUSTER_NODES,
            peers.len()
        );
        return false;
    }

    let local = match admin.local_membership().await {
        Ok(Some(view)) => view,
        Ok(None) => {
            info!("Local node is not answering membership queries yet");
            return false;
        }
        Err(e) => {
            warn!("Local membership query failed: {}", e);
            return false;
        }
    };
    if cluster_nodes(&local).len() < MIN_CLUSTER_NODES {
        info!(
            "Need at least {} cluster nodes in the local membership of {}",
            MIN_CLUSTER_NODES, node_name
        );
        return false;
    }

    let mut converged = true;
    for peer in peers {
        info!("Probing {} for cluster membership", peer);
        match admin.peer_membership(peer).await {
            Ok(Some(remote)) => {
                if views_equivalent(&local, &remote) {
                    info!("{} is in sync", peer);
                } else {
                    converged = false;
                    log_view_diff(node_name, peer, &local, &remote);
                }
            }
            Ok(None) => {
                info!("{} is not answering membership queries yet", peer);
                converged = false;
            }
            Err(e) => {
                info!("{} is unreachable: {}", peer, e);
                converged = false;
            }
        }
    }
    converged
}

/// Log which cluster members each side is still missing.
fn log_view_diff(node_name: &str, peer: &PeerAddress, local: &Value, remote: &Value) {
    let local_nodes = cluster_nodes(local);
    let remote_nodes = cluster_nodes(remote);
    let missing_remotely: Vec<&str> = local_nodes.difference(&remote_nodes).copied().collect();
    if !missing_remotely.is_empty() {
        info!(
            "Cluster members in {} not yet present in {}: {:?}",
            node_name, peer, missing_remotely
        );
    }
    let missing_locally: Vec<&str> = remote_nodes.difference(&local_nodes).copied().collect();
    if !missing_locally.is_empty() {
        info!(
            "Cluster members in {} not yet present in {}: {:?}",
            peer, node_name, missing_locally
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_sorts_arrays() {
        let a = json!(["c", "a", "b"]);
        let b = json!(["a", "b", "c"]);
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_normalize_recurses_into_nested_structures() {
        let a = json!({
            "all_nodes": ["couchdb@a-1", "couchdb@a-0"],
            "cluster_nodes": ["couchdb@a-0", "couchdb@a-1"],
        });
        let b = json!({
            "cluster_nodes": ["couchdb@a-1", "couchdb@a-0"],
            "all_nodes": ["couchdb@a-0", "couchdb@a-1"],
        });
        assert!(views_equivalent(&a, &b));
    }

    #[test]
    fn test_normalize_sorts_arrays_of_objects() {
        let a = json!([{ "n": [2, 1] }, { "m": "x" }]);
        let b = json!([{ "m": "x" }, { "n": [1, 2] }]);
        assert!(views_equivalent(&a, &b));
    }

    #[test]
    fn test_distinct_views_stay_distinct() {
        let a = json!({ "cluster_nodes": ["couchdb@a-0", "couchdb@a-1"] });
        let b = json!({ "cluster_nodes": ["couchdb@a-0"] });
        assert!(!views_equivalent(&a, &b));
    }

    #[test]
    fn test_scalars_compare_directly() {
        assert!(views_equivalent(&json!(42), &json!(42)));
        assert!(!views_equivalent(&json!(42), &json!("42")));
    }

    #[test]
    fn test_cluster_nodes_extraction() {
        let view = json!({
            "all_nodes": ["couchdb@a-0"],
            "cluster_nodes": ["couchdb@a-1", "couchdb@a-0"],
        });
        let nodes = cluster_nodes(&view);
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains("couchdb@a-0"));

        assert!(cluster_nodes(&json!({})).is_empty());
        assert!(cluster_nodes(&json!({ "cluster_nodes": "bogus" })).is_empty());
    }
}
