//! couchboot -- CouchDB cluster bootstrap coordinator.
//!
//! Runs as a sidecar in every pod of a CouchDB StatefulSet: discovers peer
//! pods through DNS SRV records, idempotently registers them as cluster
//! members on the local node, waits until every peer's membership view has
//! converged, triggers one-shot cluster finalization from the ordinal-0 pod
//! only, and then parks the process.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod convergence;
pub mod coordinator;
pub mod discovery;
pub mod errors;
pub mod join;
pub mod retry;

pub use errors::BootstrapError;
