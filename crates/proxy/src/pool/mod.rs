//! A named group of child processes sharing one lease queue.
//!
//! Children are spawned eagerly and in parallel at startup: browser startup
//! costs seconds to tens of seconds, and lazy spawning would charge that
//! latency to the first user request. A child that never reaches `Ready` is
//! retained for status reporting but never enqueued.
//!
//! A single background task probes every child on a fixed interval, directly
//! on the child's stdio and bypassing the lease queue: probing through the
//! queue would report all children healthy whenever they are all busy. One
//! probe failure is tolerated; a configurable run of consecutive failures
//! fails the child and removes it from the queue.

mod lease;

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

pub use lease::{LeaseError, LeaseKey, LeaseQueue};
use pwmcp_proxy_proto::config::{LauncherSettings, PoolConfig, ProxySettings};
use pwmcp_proxy_proto::types::{InstanceId, PoolStatus};
use tokio_util::sync::CancellationToken;

use crate::child::{ChildConfig, ChildHandle, ChildLauncher};

/// Instance selection for one lease request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseHint {
	/// Any idle child, FIFO among such requests.
	Any,
	/// One specific child by id or alias.
	Specific(LeaseKey),
}

/// A pool of sibling children and their lease queue.
pub struct Pool {
	name: String,
	description: Option<String>,
	is_default: bool,
	children: Vec<ChildHandle>,
	queue: Arc<LeaseQueue>,
	health_check_interval: Duration,
	health_failure_threshold: u32,
	shutdown_grace: Duration,
	lease_wait_ceiling: Option<Duration>,
	shutdown: CancellationToken,
}

impl std::fmt::Debug for Pool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pool")
			.field("name", &self.name)
			.field("children", &self.children.len())
			.finish_non_exhaustive()
	}
}

impl Pool {
	/// Spawn all children eagerly, wait for each to settle, and enqueue the
	/// ready ones.
	pub async fn init(
		config: &PoolConfig,
		global: &LauncherSettings,
		proxy: &ProxySettings,
		launcher: &Arc<dyn ChildLauncher>,
		stealth_script: &str,
	) -> Pool {
		let mut starts = Vec::with_capacity(config.instances as usize);
		for id in 0..config.instances {
			let child_config = ChildConfig {
				id: InstanceId(id),
				pool: config.name.clone(),
				alias: config.alias_of(id).map(str::to_string),
				settings: config.effective_settings(global, id, stealth_script),
				startup_timeout: proxy.startup_timeout,
				call_timeout: proxy.call_timeout,
				probe_timeout: proxy.probe_timeout,
			};
			let launcher = launcher.clone();
			starts.push(tokio::spawn(async move {
				ChildHandle::start(launcher.as_ref(), child_config).await
			}));
		}

		let mut children = Vec::with_capacity(starts.len());
		for start in starts {
			children.push(start.await.expect("child start task panicked"));
		}

		let queue = Arc::new(LeaseQueue::new());
		for child in &children {
			if !child.state().is_terminal() {
				queue.register(child.clone());
			}
		}

		tracing::info!(
			pool = %config.name,
			total = children.len(),
			healthy = queue.serviceable(),
			"pool initialized",
		);

		Pool {
			name: config.name.clone(),
			description: config.description.clone(),
			is_default: config.is_default,
			children,
			queue,
			health_check_interval: proxy.health_check_interval,
			health_failure_threshold: proxy.health_failure_threshold,
			shutdown_grace: proxy.shutdown_grace,
			lease_wait_ceiling: proxy.lease_wait_ceiling,
			shutdown: CancellationToken::new(),
		}
	}

	/// Pool name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Whether this is the registry's default pool.
	#[must_use]
	pub fn is_default(&self) -> bool {
		self.is_default
	}

	/// Whether any child in this pool is configured with the given alias.
	#[must_use]
	pub fn has_alias(&self, alias: &str) -> bool {
		self.children.iter().any(|c| c.alias() == Some(alias))
	}

	/// Acquire a child, blocking until one matching the hint is available.
	///
	/// The returned guard releases the lease exactly once on every exit path:
	/// normal return, propagated error, or cancellation. A handle that failed
	/// during the lease is dropped by the guard instead of re-enqueued.
	pub async fn lease(
		&self,
		cancel: &CancellationToken,
		hint: &LeaseHint,
	) -> Result<LeaseGuard, LeaseError> {
		let acquire = async {
			match hint {
				LeaseHint::Any => self.queue.lease_any(cancel).await,
				LeaseHint::Specific(key) => self.queue.lease_specific(cancel, key).await,
			}
		};

		let handle = match self.lease_wait_ceiling {
			Some(ceiling) => tokio::time::timeout(ceiling, acquire)
				.await
				.map_err(|_| LeaseError::Exhausted)??,
			None => acquire.await?,
		};

		let info = handle.begin_lease();
		tracing::debug!(pool = %self.name, instance = %info.instance_id, "lease granted");
		Ok(LeaseGuard {
			handle: Some(handle),
			queue: self.queue.clone(),
		})
	}

	/// Status snapshot of every child.
	#[must_use]
	pub fn status(&self) -> PoolStatus {
		let instances: Vec<_> = self.children.iter().map(ChildHandle::status).collect();
		let healthy = instances
			.iter()
			.filter(|status| !status.state.is_terminal())
			.count();
		PoolStatus {
			name: self.name.clone(),
			description: self.description.clone(),
			is_default: self.is_default,
			healthy_instances: healthy,
			total_instances: instances.len(),
			instances,
		}
	}

	/// Probe every child on the configured interval until shutdown.
	pub fn spawn_health_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let pool = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(pool.health_check_interval);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			interval.tick().await;
			loop {
				tokio::select! {
					() = pool.shutdown.cancelled() => break,
					_ = interval.tick() => pool.probe_all().await,
				}
			}
		})
	}

	/// One health sweep: probe all serviceable children in parallel.
	async fn probe_all(&self) {
		let mut probes = tokio::task::JoinSet::new();
		for child in &self.children {
			if child.state().is_terminal() {
				continue;
			}
			let child = child.clone();
			let threshold = self.health_failure_threshold;
			let queue = self.queue.clone();
			let pool = self.name.clone();
			probes.spawn(async move {
				match child.probe().await {
					Ok(()) => {}
					Err(e) => {
						let failures = child.record_probe_failure();
						tracing::warn!(
							pool = %pool,
							instance = %child.id(),
							failures,
							error = %e,
							"health probe failed",
						);
						if failures >= threshold {
							child.mark_failed("health probe threshold reached");
							queue.remove(child.id());
						}
					}
				}
			});
		}
		while probes.join_next().await.is_some() {}
	}

	/// Drain the queue, stop all children in parallel, and reject further
	/// lease requests with `ShuttingDown`.
	pub async fn shutdown(&self) {
		tracing::info!(pool = %self.name, "pool shutting down");
		self.shutdown.cancel();
		self.queue.shutdown();

		let mut stops = tokio::task::JoinSet::new();
		for child in &self.children {
			let child = child.clone();
			let grace = self.shutdown_grace;
			stops.spawn(async move { child.stop(grace).await });
		}
		while stops.join_next().await.is_some() {}
	}

}

/// Scoped lease over one child: releases exactly once when dropped.
#[derive(Debug)]
pub struct LeaseGuard {
	handle: Option<ChildHandle>,
	queue: Arc<LeaseQueue>,
}

impl LeaseGuard {
	/// The leased child.
	#[must_use]
	pub fn child(&self) -> &ChildHandle {
		self.handle
			.as_ref()
			.expect("lease guard accessed after release")
	}
}

impl Deref for LeaseGuard {
	type Target = ChildHandle;

	fn deref(&self) -> &Self::Target {
		self.child()
	}
}

impl Drop for LeaseGuard {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.end_lease();
			self.queue.release(handle);
		}
	}
}

#[cfg(test)]
mod tests;
