//! couchboot -- CouchDB cluster bootstrap sidecar.
//!
//! Exits non-zero when discovery or join exhaust their bounded retries so
//! the orchestrator restarts the pod; after a successful bootstrap the
//! process idles forever and never exits on its own.

use clap::Parser;
use tracing::info;

use couchboot::admin::AdminClient;
use couchboot::coordinator::OrdinalElector;
use couchboot::discovery::SrvPeerSource;

/// Command-line arguments for the couchboot sidecar.
#[derive(Parser, Debug)]
#[command(
    name = "couchboot",
    version,
    about = "CouchDB cluster bootstrap sidecar for Kubernetes StatefulSets"
)]
struct Cli {
    /// Path to the YAML configuration file.  Defaults come from the
    /// environment when omitted.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            couchboot::config::load_config(path)?
        }
        None => couchboot::config::Config::default(),
    };
    config.apply_env_overrides();

    let elector = OrdinalElector::new(&config.node.name);
    info!(
        "couchboot starting: node={} ordinal={:?}",
        config.node.name,
        elector.ordinal()
    );

    let record = couchboot::discovery::service_record(&config)?;
    let policy = couchboot::bootstrap::backoff_policy(&config);
    let peer_source = SrvPeerSource::from_system_conf(record, policy)?;
    let admin = AdminClient::new(&config)?;

    couchboot::bootstrap::run(&config, &peer_source, &admin, &elector).await?;
    Ok(())
}
