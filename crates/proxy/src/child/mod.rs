//! One `playwright-mcp` child process: spawn, stdio framing, request
//! correlation, health probes, and termination.
//!
//! # Mental model
//!
//! - A [`ChildHandle`] is a cheap clone over the shared supervisor state for
//!   one subprocess. The pool owns the canonical copies; the lease queue and
//!   in-flight tool calls hold non-owning clones.
//! - Outbound frames are serialized one JSON object per line under a writer
//!   mutex, so frames never interleave even when a health probe races a tool
//!   call on the same stdio pair.
//! - A single reader task consumes stdout lines and routes responses to the
//!   waiter registered under the request id. Replies may arrive in any order;
//!   correlation is by id alone. Unknown ids are dropped with a log entry.
//! - Every call carries a deadline. A timed-out call removes its waiter and
//!   fails with `Timeout`; the child stays usable and the late reply is
//!   discarded.
//! - Stdout EOF or a parse error completes all outstanding waiters with
//!   `ChildGone` and transitions the child to `Failed`. Failed children
//!   accept no further calls.
//!
//! # Lifecycle
//!
//! `Starting` → `Ready` on a completed initialize handshake (initialize,
//! initialized notification, tools/list) within the startup window;
//! `Ready` ↔ `Leased` as tool calls come and go; any state → `Failed` on an
//! unrecoverable stdio error or sustained probe failure; any state →
//! `Stopped` on proxy shutdown.

pub mod command;
mod launcher;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
pub use launcher::{ChildLauncher, ChildProcess, ProcessLauncher};
use pwmcp_proxy_proto::config::LauncherSettings;
use pwmcp_proxy_proto::rpc::{Inbound, RpcError, RpcNotification, RpcRequest};
use pwmcp_proxy_proto::types::{ChildState, InstanceId, InstanceStatus, LeaseInfo};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

/// Frozen configuration for one child instance.
#[derive(Debug, Clone)]
pub struct ChildConfig {
	/// Pool-local id.
	pub id: InstanceId,
	/// Name of the owning pool, for logging and status.
	pub pool: String,
	/// Optional alias.
	pub alias: Option<String>,
	/// Effective launcher settings (Instance > Pool > Global, stealth expanded).
	pub settings: LauncherSettings,
	/// Window for the initialize handshake.
	pub startup_timeout: Duration,
	/// Default per-call deadline.
	pub call_timeout: Duration,
	/// Deadline for health probes.
	pub probe_timeout: Duration,
}

/// Errors surfaced by [`ChildHandle::call`].
#[derive(Debug, Error)]
pub enum CallError {
	#[error("call timed out after {0:?}")]
	Timeout(Duration),

	#[error("child process is gone")]
	ChildGone,

	#[error("call cancelled")]
	Cancelled,

	#[error("remote error {code}: {message}")]
	Remote { code: i64, message: String },

	#[error("failed to encode request frame: {0}")]
	Encode(#[from] serde_json::Error),
}

impl From<RpcError> for CallError {
	fn from(err: RpcError) -> Self {
		CallError::Remote {
			code: err.code,
			message: err.message,
		}
	}
}

type Waiter = oneshot::Sender<Result<Value, CallError>>;

/// Shared supervisor state for one child process.
struct ChildInner {
	config: ChildConfig,
	pid: Option<u32>,
	state: Mutex<ChildState>,
	lease: Mutex<Option<LeaseInfo>>,
	last_health_ok: Mutex<Option<DateTime<Utc>>>,
	health_failures: AtomicU32,
	next_request_id: AtomicU64,
	pending: Mutex<HashMap<u64, Waiter>>,
	writer: tokio::sync::Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
	process: Mutex<Option<tokio::process::Child>>,
}

impl std::fmt::Debug for ChildInner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChildInner")
			.field("pool", &self.config.pool)
			.field("id", &self.config.id)
			.field("pid", &self.pid)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

/// Handle to one supervised child process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChildHandle {
	inner: Arc<ChildInner>,
}

impl ChildHandle {
	/// Launch a child and run the initialize handshake.
	///
	/// Always returns a handle: on spawn or handshake failure the handle is
	/// in state `Failed` so the pool can retain it for status reporting
	/// without enqueuing it.
	pub async fn start(launcher: &dyn ChildLauncher, config: ChildConfig) -> ChildHandle {
		let startup_timeout = config.startup_timeout;
		let pool = config.pool.clone();
		let id = config.id;

		let spawned = match launcher.launch(&config).await {
			Ok(spawned) => spawned,
			Err(e) => {
				tracing::error!(pool = %pool, instance = %id, error = %e, "failed to spawn child");
				return ChildHandle::unspawned(config, ChildState::Failed);
			}
		};

		let handle = ChildHandle {
			inner: Arc::new(ChildInner {
				pid: spawned.pid,
				state: Mutex::new(ChildState::Starting),
				lease: Mutex::new(None),
				last_health_ok: Mutex::new(None),
				health_failures: AtomicU32::new(0),
				next_request_id: AtomicU64::new(1),
				pending: Mutex::new(HashMap::new()),
				writer: tokio::sync::Mutex::new(Some(spawned.stdin)),
				process: Mutex::new(spawned.process),
				config,
			}),
		};
		handle.spawn_reader(spawned.stdout);

		match tokio::time::timeout(startup_timeout, handle.handshake()).await {
			Ok(Ok(tool_count)) => {
				handle.inner.set_state(ChildState::Ready);
				tracing::info!(pool = %pool, instance = %id, tool_count, "child ready");
			}
			Ok(Err(e)) => {
				tracing::error!(pool = %pool, instance = %id, error = %e, "initialize handshake failed");
				handle.inner.fail("handshake failure");
				handle.stop(Duration::from_secs(1)).await;
			}
			Err(_) => {
				tracing::error!(
					pool = %pool,
					instance = %id,
					timeout = ?startup_timeout,
					"child did not initialize within the startup window",
				);
				handle.inner.fail("startup timeout");
				handle.stop(Duration::from_secs(1)).await;
			}
		}

		handle
	}

	/// Build a handle with no underlying process, for spawn failures.
	fn unspawned(config: ChildConfig, state: ChildState) -> ChildHandle {
		ChildHandle {
			inner: Arc::new(ChildInner {
				pid: None,
				state: Mutex::new(state),
				lease: Mutex::new(None),
				last_health_ok: Mutex::new(None),
				health_failures: AtomicU32::new(0),
				next_request_id: AtomicU64::new(1),
				pending: Mutex::new(HashMap::new()),
				writer: tokio::sync::Mutex::new(None),
				process: Mutex::new(None),
				config,
			}),
		}
	}

	/// MCP initialize handshake: initialize, initialized, tools/list.
	///
	/// Returns the number of tools the child advertises.
	async fn handshake(&self) -> Result<usize, CallError> {
		self.call(
			"initialize",
			json!({
				"protocolVersion": "2024-11-05",
				"capabilities": {},
				"clientInfo": {
					"name": "pwmcp-proxy",
					"version": env!("CARGO_PKG_VERSION"),
				},
			}),
			None,
		)
		.await?;

		self.notify("notifications/initialized", json!({})).await?;

		let tools = self.call("tools/list", json!({}), None).await?;
		let count = tools
			.get("tools")
			.and_then(Value::as_array)
			.map_or(0, Vec::len);
		Ok(count)
	}

	/// Issue one JSON-RPC request and await its correlated reply.
	///
	/// `timeout` defaults to the configured per-call deadline. On timeout the
	/// waiter is removed, the call fails with `Timeout`, and the child is NOT
	/// killed; its eventual reply is discarded by the reader.
	pub async fn call(
		&self,
		method: &str,
		params: Value,
		timeout: Option<Duration>,
	) -> Result<Value, CallError> {
		if self.state().is_terminal() {
			return Err(CallError::ChildGone);
		}

		let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.inner.pending_lock().insert(id, tx);

		let frame = match serde_json::to_string(&RpcRequest::new(id, method, params)) {
			Ok(frame) => frame,
			Err(e) => {
				self.inner.pending_lock().remove(&id);
				return Err(e.into());
			}
		};

		if let Err(e) = self.write_line(&frame).await {
			self.inner.pending_lock().remove(&id);
			tracing::error!(
				pool = %self.inner.config.pool,
				instance = %self.id(),
				error = %e,
				"stdin write failed",
			);
			self.inner.fail("stdin write failure");
			return Err(CallError::ChildGone);
		}

		let deadline = timeout.unwrap_or(self.inner.config.call_timeout);
		match tokio::time::timeout(deadline, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(CallError::ChildGone),
			Err(_) => {
				self.inner.pending_lock().remove(&id);
				Err(CallError::Timeout(deadline))
			}
		}
	}

	/// Send a JSON-RPC notification (no reply expected).
	pub async fn notify(&self, method: &str, params: Value) -> Result<(), CallError> {
		let frame = serde_json::to_string(&RpcNotification::new(method, params))?;
		if let Err(e) = self.write_line(&frame).await {
			tracing::error!(
				pool = %self.inner.config.pool,
				instance = %self.id(),
				error = %e,
				"stdin write failed",
			);
			self.inner.fail("stdin write failure");
			return Err(CallError::ChildGone);
		}
		Ok(())
	}

	/// Liveness probe: an MCP ping with a short deadline.
	///
	/// Does not acquire a lease; probes are legitimate concurrent users of
	/// the stdio pair alongside tool calls.
	pub async fn probe(&self) -> Result<(), CallError> {
		let timeout = self.inner.config.probe_timeout;
		self.call("ping", json!({}), Some(timeout)).await?;
		*self
			.inner
			.last_health_ok
			.lock()
			.expect("health mutex poisoned") = Some(Utc::now());
		self.inner.health_failures.store(0, Ordering::Relaxed);
		Ok(())
	}

	/// Record one probe failure, returning the consecutive failure count.
	pub fn record_probe_failure(&self) -> u32 {
		self.inner.health_failures.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Stop the child: close stdin, wait `grace` for natural exit, then
	/// SIGTERM, then SIGKILL after another `grace`.
	///
	/// All outstanding waiters complete with `Cancelled`.
	pub async fn stop(&self, grace: Duration) {
		{
			let mut state = self.inner.state_lock();
			if *state != ChildState::Failed {
				*state = ChildState::Stopped;
			}
		}
		self.inner.fail_all(|| CallError::Cancelled);

		// Dropping the writer closes the child's stdin.
		*self.inner.writer.lock().await = None;

		let process = self
			.inner
			.process
			.lock()
			.expect("process mutex poisoned")
			.take();
		let Some(mut process) = process else {
			return;
		};

		if tokio::time::timeout(grace, process.wait()).await.is_ok() {
			return;
		}

		#[cfg(unix)]
		if let Some(pid) = self.inner.pid {
			let _ = nix::sys::signal::kill(
				nix::unistd::Pid::from_raw(pid as i32),
				nix::sys::signal::Signal::SIGTERM,
			);
		}

		if tokio::time::timeout(grace, process.wait()).await.is_ok() {
			return;
		}

		tracing::warn!(
			pool = %self.inner.config.pool,
			instance = %self.id(),
			"child ignored SIGTERM, killing",
		);
		let _ = process.kill().await;
	}

	/// Mark the child failed and complete all outstanding waiters.
	pub fn mark_failed(&self, reason: &str) {
		self.inner.fail(reason);
	}

	/// Record the start of a lease. The caller must hold the queue grant.
	pub fn begin_lease(&self) -> LeaseInfo {
		let info = LeaseInfo {
			instance_id: self.id(),
			started_at: Utc::now(),
		};
		{
			let mut state = self.inner.state_lock();
			if *state == ChildState::Ready {
				*state = ChildState::Leased;
			}
		}
		*self.inner.lease.lock().expect("lease mutex poisoned") = Some(info.clone());
		info
	}

	/// Record the end of a lease.
	pub fn end_lease(&self) {
		*self.inner.lease.lock().expect("lease mutex poisoned") = None;
		let mut state = self.inner.state_lock();
		if *state == ChildState::Leased {
			*state = ChildState::Ready;
		}
	}

	/// Pool-local id.
	#[must_use]
	pub fn id(&self) -> InstanceId {
		self.inner.config.id
	}

	/// Configured alias, if any.
	#[must_use]
	pub fn alias(&self) -> Option<&str> {
		self.inner.config.alias.as_deref()
	}

	/// Current lifecycle state.
	#[must_use]
	pub fn state(&self) -> ChildState {
		self.inner.state()
	}

	/// Status snapshot for pool reporting.
	#[must_use]
	pub fn status(&self) -> InstanceStatus {
		InstanceStatus {
			id: self.id(),
			alias: self.inner.config.alias.clone(),
			state: self.state(),
			pid: self.inner.pid,
			browser: self.inner.config.settings.browser.clone(),
			headless: self.inner.config.settings.headless.unwrap_or(false),
			lease: self
				.inner
				.lease
				.lock()
				.expect("lease mutex poisoned")
				.clone(),
			last_health_ok: *self
				.inner
				.last_health_ok
				.lock()
				.expect("health mutex poisoned"),
			consecutive_health_failures: self.inner.health_failures.load(Ordering::Relaxed),
		}
	}

	async fn write_line(&self, frame: &str) -> std::io::Result<()> {
		let mut writer = self.inner.writer.lock().await;
		let Some(writer) = writer.as_mut() else {
			return Err(std::io::Error::new(
				std::io::ErrorKind::BrokenPipe,
				"child stdin closed",
			));
		};
		writer.write_all(frame.as_bytes()).await?;
		writer.write_all(b"\n").await?;
		writer.flush().await
	}

	fn spawn_reader(&self, stdout: Box<dyn AsyncRead + Send + Unpin>) {
		let inner = self.inner.clone();
		tokio::spawn(async move {
			let mut lines = BufReader::new(stdout).lines();
			let reason = loop {
				match lines.next_line().await {
					Ok(Some(line)) => {
						if line.trim().is_empty() {
							continue;
						}
						match Inbound::parse(&line) {
							Ok(frame) => inner.route(frame),
							Err(e) => {
								tracing::error!(
									pool = %inner.config.pool,
									instance = %inner.config.id,
									error = %e,
									"unparseable frame on child stdout",
								);
								break "protocol error";
							}
						}
					}
					Ok(None) => break "stdout EOF",
					Err(e) => {
						tracing::error!(
							pool = %inner.config.pool,
							instance = %inner.config.id,
							error = %e,
							"error reading child stdout",
						);
						break "stdout read error";
					}
				}
			};
			inner.on_reader_exit(reason);
		});
	}
}

impl ChildInner {
	fn state(&self) -> ChildState {
		*self.state.lock().expect("state mutex poisoned")
	}

	fn state_lock(&self) -> std::sync::MutexGuard<'_, ChildState> {
		self.state.lock().expect("state mutex poisoned")
	}

	fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
		self.pending.lock().expect("pending mutex poisoned")
	}

	fn set_state(&self, state: ChildState) {
		*self.state_lock() = state;
	}

	/// Route one inbound frame to its waiter.
	fn route(&self, frame: Inbound) {
		match frame {
			Inbound::Response { id, result } => {
				let waiter = self.pending_lock().remove(&id);
				match waiter {
					Some(tx) => {
						let _ = tx.send(result.map_err(CallError::from));
					}
					None => {
						tracing::debug!(
							pool = %self.config.pool,
							instance = %self.config.id,
							id,
							"dropping reply with unknown or timed-out id",
						);
					}
				}
			}
			Inbound::Notification { method, params } => {
				if method == "notifications/progress" {
					tracing::debug!(
						pool = %self.config.pool,
						instance = %self.config.id,
						%params,
						"child progress",
					);
				} else {
					tracing::trace!(
						pool = %self.config.pool,
						instance = %self.config.id,
						%method,
						"ignoring child notification",
					);
				}
			}
			Inbound::Request { id, method } => {
				tracing::debug!(
					pool = %self.config.pool,
					instance = %self.config.id,
					?id,
					%method,
					"dropping server-initiated request",
				);
			}
		}
	}

	/// Reader task exit: fail or cancel all outstanding waiters.
	fn on_reader_exit(&self, reason: &str) {
		let stopping = {
			let mut state = self.state_lock();
			if state.is_terminal() {
				*state == ChildState::Stopped
			} else {
				tracing::warn!(
					pool = %self.config.pool,
					instance = %self.config.id,
					reason,
					"child stdio closed, marking failed",
				);
				*state = ChildState::Failed;
				false
			}
		};

		if stopping {
			self.fail_all(|| CallError::Cancelled);
		} else {
			self.fail_all(|| CallError::ChildGone);
		}
	}

	fn fail(&self, reason: &str) {
		{
			let mut state = self.state_lock();
			if *state == ChildState::Stopped {
				return;
			}
			if *state != ChildState::Failed {
				tracing::warn!(
					pool = %self.config.pool,
					instance = %self.config.id,
					reason,
					"child failed",
				);
			}
			*state = ChildState::Failed;
		}
		self.fail_all(|| CallError::ChildGone);
	}

	fn fail_all(&self, error: impl Fn() -> CallError) {
		let waiters: Vec<Waiter> = {
			let mut pending = self.pending.lock().expect("pending mutex poisoned");
			pending.drain().map(|(_, tx)| tx).collect()
		};
		for tx in waiters {
			let _ = tx.send(Err(error()));
		}
	}
}

#[cfg(test)]
mod tests;
