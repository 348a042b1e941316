//! Full-stack construction for dispatcher tests.

use std::sync::Arc;
use std::time::Duration;

use pwmcp_proxy_proto::config::{BlobSettings, ConfigTree};
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::dispatch::Dispatcher;
use crate::registry::PoolRegistry;
use crate::snapshot::SnapshotCache;
use crate::testutil::FakeLauncher;

pub struct TestStack {
	pub dispatcher: Dispatcher,
	pub registry: Arc<PoolRegistry>,
	pub blobs: Arc<BlobStore>,
	pub snapshots: Arc<SnapshotCache>,
	pub launcher: FakeLauncher,
	pub cancel: CancellationToken,
	_blob_dir: tempfile::TempDir,
}

impl TestStack {
	/// How many times the fake children saw the given method.
	pub fn calls_to(&self, method: &str) -> usize {
		self.launcher
			.received
			.lock()
			.unwrap()
			.iter()
			.filter(|(m, _)| m == method)
			.count()
	}
}

/// One default pool of `instances` children behind a full dispatcher stack.
pub async fn stack(instances: u32, launcher: FakeLauncher) -> TestStack {
	let tree = ConfigTree::from_vars(vec![
		(
			"PW_MCP_PROXY__DEFAULT_INSTANCES".to_string(),
			instances.to_string(),
		),
		(
			"PW_MCP_PROXY__DEFAULT_IS_DEFAULT".to_string(),
			"true".to_string(),
		),
	])
	.unwrap();

	let registry = Arc::new(
		PoolRegistry::build(&tree, Arc::new(launcher.clone()))
			.await
			.unwrap(),
	);

	let blob_dir = tempfile::tempdir().unwrap();
	let blobs = Arc::new(
		BlobStore::open(&BlobSettings {
			storage_root: Some(blob_dir.path().to_path_buf()),
			..tree.blob.clone()
		})
		.unwrap(),
	);
	let snapshots = Arc::new(SnapshotCache::new(Duration::from_secs(600)));

	let dispatcher = Dispatcher::new(
		registry.clone(),
		blobs.clone(),
		snapshots.clone(),
		tree.blob.inline_threshold,
	);

	TestStack {
		dispatcher,
		registry,
		blobs,
		snapshots,
		launcher,
		cancel: CancellationToken::new(),
		_blob_dir: blob_dir,
	}
}
