//! Lease queue fairness, targeting, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use pwmcp_proxy_proto::config::ProxySettings;
use pwmcp_proxy_proto::types::InstanceId;
use tokio_util::sync::CancellationToken;

use super::helpers::{make_pool, make_pool_with, pool_config, pool_config_with_aliases};
use crate::pool::{LeaseError, LeaseHint, LeaseKey};
use crate::testutil::FakeLauncher;

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_any_is_fifo_among_waiters() {
	let pool = make_pool(2, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let a = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	let b = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	let a_id = a.id();

	let waiter_c = {
		let pool = pool.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move { pool.lease(&cancel, &LeaseHint::Any).await })
	};
	tokio::task::yield_now().await;
	assert!(!waiter_c.is_finished());

	// C must receive A's former child, not B's still-held one.
	drop(a);
	let c = waiter_c.await.unwrap().unwrap();
	assert_eq!(c.id(), a_id);

	drop(b);
	drop(c);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn three_waiters_complete_in_arrival_order() {
	let pool = make_pool(1, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let held = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();

	let mut waiters = Vec::new();
	for _ in 0..3 {
		let pool = pool.clone();
		let cancel = cancel.clone();
		waiters.push(tokio::spawn(async move {
			pool.lease(&cancel, &LeaseHint::Any).await
		}));
		tokio::task::yield_now().await;
	}

	drop(held);
	for waiter in waiters {
		// Each waiter acquires and releases in turn; any deadlock here means
		// FIFO hand-off broke.
		let guard = waiter.await.unwrap().unwrap();
		drop(guard);
		tokio::task::yield_now().await;
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_specific_by_id_and_alias() {
	let config = pool_config_with_aliases("default", 2, &[(1, "scraper")]);
	let pool = make_pool_with(config, ProxySettings::default(), Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let by_alias = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::parse("scraper")))
		.await
		.unwrap();
	assert_eq!(by_alias.id(), InstanceId(1));
	drop(by_alias);

	let by_id = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::parse("0")))
		.await
		.unwrap();
	assert_eq!(by_id.id(), InstanceId(0));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_specific_unknown_key_fails_immediately() {
	let pool = make_pool(1, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let err = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::parse("5")))
		.await
		.unwrap_err();
	assert!(matches!(err, LeaseError::NotFound(_)));

	let err = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::parse("nonesuch")))
		.await
		.unwrap_err();
	assert!(matches!(err, LeaseError::NotFound(_)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_specific_on_failed_handle_fails_immediately() {
	let pool = make_pool(2, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let target = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::Id(1)))
		.await
		.unwrap();
	target.mark_failed("test-induced failure");
	drop(target);

	let err = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::Id(1)))
		.await
		.unwrap_err();
	assert!(matches!(err, LeaseError::NotFound(_)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_specific_waits_for_release_of_busy_child() {
	let pool = make_pool(2, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let held = pool
		.lease(&cancel, &LeaseHint::Specific(LeaseKey::Id(0)))
		.await
		.unwrap();

	let waiter = {
		let pool = pool.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move {
			pool.lease(&cancel, &LeaseHint::Specific(LeaseKey::Id(0)))
				.await
		})
	};
	tokio::task::yield_now().await;
	assert!(!waiter.is_finished());

	drop(held);
	let granted = waiter.await.unwrap().unwrap();
	assert_eq!(granted.id(), InstanceId(0));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cancelled_wait_grants_no_handle() {
	let pool = make_pool(1, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let held = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();

	let waiter_cancel = CancellationToken::new();
	let waiter = {
		let pool = pool.clone();
		let token = waiter_cancel.clone();
		tokio::spawn(async move { pool.lease(&token, &LeaseHint::Any).await })
	};
	tokio::task::yield_now().await;

	waiter_cancel.cancel();
	let result = waiter.await.unwrap();
	assert!(matches!(result, Err(LeaseError::Cancelled)));

	// The child is untouched by the cancelled wait and leases normally.
	drop(held);
	let next = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	assert_eq!(next.id(), InstanceId(0));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lease_wait_ceiling_yields_pool_exhausted() {
	let proxy = ProxySettings {
		lease_wait_ceiling: Some(Duration::from_secs(10)),
		..ProxySettings::default()
	};
	let pool = make_pool_with(
		pool_config("default", 1),
		proxy,
		Arc::new(FakeLauncher::new()),
	)
	.await;
	let cancel = CancellationToken::new();

	let _held = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	let err = pool.lease(&cancel, &LeaseHint::Any).await.unwrap_err();
	assert!(matches!(err, LeaseError::Exhausted));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_handle_is_dropped_on_release() {
	let pool = make_pool(2, Arc::new(FakeLauncher::new())).await;
	let cancel = CancellationToken::new();

	let guard = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
	let failed_id = guard.id();
	guard.mark_failed("stdio torn down mid-call");
	drop(guard);

	let status = pool.status();
	assert_eq!(status.healthy_instances, 1);
	assert_eq!(status.total_instances, 2);

	// The surviving child is the only one ever leased again.
	for _ in 0..3 {
		let guard = pool.lease(&cancel, &LeaseHint::Any).await.unwrap();
		assert_ne!(guard.id(), failed_id);
		drop(guard);
		tokio::task::yield_now().await;
	}
}
