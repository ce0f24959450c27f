//! waypost worker entry point.
//!
//! Boots the offline caching worker on a line-delimited JSON stdio transport.
//! Logging goes to stderr to avoid interfering with the frames on stdout.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use waypost_client::{FetchConfig, HttpNetwork};
use waypost_core::{WorkerConfig, WorkerDb};

mod error;
mod handler;
mod host;
mod transport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = WorkerConfig::load()?;
    tracing::info!(
        origin = %config.origin,
        cache_id = %config.composite_cache_id(),
        db = %config.db_path.display(),
        "starting waypost worker on stdio transport"
    );

    let db = WorkerDb::open(&config.db_path).await?;
    let network = Arc::new(HttpNetwork::new(FetchConfig::from_worker_config(&config)?)?);
    let (host, commands) = host::StdioHost::new();
    let host = Arc::new(host);
    let worker = handler::Worker::new(config, db, network, host.clone())?;

    transport::serve(worker, host, commands, tokio::io::stdin(), tokio::io::stdout()).await?;

    tracing::info!("worker settled, exiting");
    Ok(())
}
