//! Health loop behavior: probe failures, thresholds, and lease bypass.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pwmcp_proxy_proto::types::ChildState;
use tokio_util::sync::CancellationToken;

use super::helpers::make_pool;
use crate::pool::{LeaseError, LeaseHint, LeaseKey};
use crate::testutil::{FakeLauncher, FakeReply};

/// A launcher whose children stop answering pings after the handshake.
fn deaf_to_pings() -> FakeLauncher {
	FakeLauncher::with_script(|method, _| match method {
		"ping" => Some(FakeReply::Ignore),
		_ => None,
	})
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn consecutive_probe_failures_fail_the_child() {
	let pool = make_pool(1, Arc::new(deaf_to_pings())).await;
	let health = pool.spawn_health_loop();

	// Three sweeps at 20s intervals, each probe timing out after 5s.
	tokio::time::sleep(Duration::from_secs(3 * 20 + 10)).await;

	let status = pool.status();
	assert_eq!(status.instances[0].state, ChildState::Failed);
	assert_eq!(status.healthy_instances, 0);

	// A failed child is never leased again.
	let cancel = CancellationToken::new();
	let err = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::Id(0)))
		.await
		.unwrap_err();
	assert!(matches!(err, LeaseError::NotFound(_)));

	health.abort();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn single_probe_failure_is_tolerated() {
	// First ping is swallowed; subsequent pings answer normally.
	let pings = Arc::new(AtomicU32::new(0));
	let counter = pings.clone();
	let launcher = FakeLauncher::with_script(move |method, _| {
		if method == "ping" && counter.fetch_add(1, Ordering::Relaxed) == 0 {
			Some(FakeReply::Ignore)
		} else {
			None
		}
	});
	let pool = make_pool(1, Arc::new(launcher)).await;
	let health = pool.spawn_health_loop();

	// Past the first (failing) and second (passing) sweeps.
	tokio::time::sleep(Duration::from_secs(2 * 20 + 10)).await;

	let status = pool.status();
	assert_eq!(status.instances[0].state, ChildState::Ready);
	assert_eq!(status.instances[0].consecutive_health_failures, 0);
	assert!(status.instances[0].last_health_ok.is_some());

	health.abort();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn probes_reach_leased_children_without_queueing() {
	let pool = make_pool(1, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let guard = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	let health = pool.spawn_health_loop();

	// The probe runs while the only child is leased; it must not wait for
	// the release.
	tokio::time::sleep(Duration::from_secs(25)).await;

	let status = pool.status();
	assert_eq!(status.instances[0].state, ChildState::Leased);
	assert!(status.instances[0].lease.is_some());
	assert!(status.instances[0].last_health_ok.is_some());

	drop(guard);
	health.abort();
}
