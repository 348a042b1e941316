//! playwright-mcp proxy daemon.
//!
//! Loads the hierarchical configuration from the environment, boots the
//! child fleet, starts the background sweepers, and runs until interrupted.

use std::sync::Arc;

use clap::Parser;
use pwmcp_proxy::blob::BlobStore;
use pwmcp_proxy::child::ProcessLauncher;
use pwmcp_proxy::dispatch::Dispatcher;
use pwmcp_proxy::registry::PoolRegistry;
use pwmcp_proxy::snapshot::SnapshotCache;
use pwmcp_proxy_proto::ConfigTree;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Proxy command line arguments.
#[derive(Parser, Debug)]
#[command(name = "pwmcp-proxy")]
#[command(about = "Pooling proxy for playwright-mcp browser automation servers")]
struct Args {
	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.init();

	info!("starting pwmcp-proxy");

	let tree = ConfigTree::from_env()?;
	info!(pools = tree.pools.len(), "configuration loaded");

	let blobs = Arc::new(BlobStore::open(&tree.blob)?);
	info!(root = %blobs.root().display(), "blob store ready");
	let snapshots = Arc::new(SnapshotCache::new(tree.proxy.snapshot_ttl));

	let registry = Arc::new(PoolRegistry::build(&tree, Arc::new(ProcessLauncher::new())).await?);
	// The embedding MCP server forwards every tool call through this.
	let _dispatcher = Arc::new(Dispatcher::new(
		registry.clone(),
		blobs.clone(),
		snapshots.clone(),
		tree.blob.inline_threshold,
	));

	let shutdown = CancellationToken::new();
	blobs.spawn_sweeper(shutdown.clone());
	snapshots.spawn_sweeper(tree.blob.sweep_interval, shutdown.clone());

	info!("fleet ready, waiting for interrupt");
	tokio::signal::ctrl_c().await?;

	info!("interrupt received, shutting down");
	shutdown.cancel();
	registry.shutdown().await;

	Ok(())
}
