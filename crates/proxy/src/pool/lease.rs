//! Blocking FIFO lease queue over a pool's child handles.
//!
//! A handle is either on the queue or leased to exactly one caller, never
//! both and never neither; failed or stopped handles are removed permanently.
//! `lease_any` callers are served in arrival order. `lease_specific` callers
//! are not ordered against each other or against `lease_any`: a release of
//! handle `k` serves the oldest waiter for `k` specifically before the
//! general queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use pwmcp_proxy_proto::types::InstanceId;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::child::ChildHandle;

/// Instance selector: a numeric id or a configured alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseKey {
	Id(u32),
	Alias(String),
}

impl LeaseKey {
	/// Parse a selector string; all-digit strings are numeric ids.
	#[must_use]
	pub fn parse(raw: &str) -> LeaseKey {
		if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
			if let Ok(id) = raw.parse::<u32>() {
				return LeaseKey::Id(id);
			}
		}
		LeaseKey::Alias(raw.to_string())
	}
}

impl std::fmt::Display for LeaseKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LeaseKey::Id(id) => write!(f, "{id}"),
			LeaseKey::Alias(alias) => f.write_str(alias),
		}
	}
}

/// Errors surfaced by lease acquisition.
#[derive(Debug, Error)]
pub enum LeaseError {
	#[error("no instance matching {0}")]
	NotFound(String),

	#[error("pool is shutting down")]
	ShuttingDown,

	#[error("lease wait cancelled")]
	Cancelled,

	#[error("lease wait ceiling exceeded")]
	Exhausted,
}

type Grant = Result<ChildHandle, LeaseError>;

#[derive(Debug)]
struct Waiter {
	token: u64,
	tx: oneshot::Sender<Grant>,
}

#[derive(Default, Debug)]
struct QueueState {
	/// Registered non-terminal handles by id.
	handles: HashMap<InstanceId, ChildHandle>,
	/// Alias index over registered handles.
	aliases: HashMap<String, InstanceId>,
	/// Idle handles, earliest released first.
	idle: VecDeque<InstanceId>,
	/// `lease_any` waiters in arrival order.
	any_waiters: VecDeque<Waiter>,
	/// Waiters for one specific handle, per id.
	specific_waiters: HashMap<InstanceId, VecDeque<Waiter>>,
	next_token: u64,
	shutting_down: bool,
}

impl QueueState {
	/// Pop the first idle id whose handle is still serviceable.
	fn take_idle(&mut self) -> Option<ChildHandle> {
		while let Some(id) = self.idle.pop_front() {
			let Some(handle) = self.handles.get(&id) else {
				continue;
			};
			if handle.state().is_terminal() {
				self.purge(id);
				continue;
			}
			return Some(handle.clone());
		}
		None
	}

	/// Take a specific idle handle out of the middle of the queue.
	fn take_idle_specific(&mut self, id: InstanceId) -> Option<ChildHandle> {
		let pos = self.idle.iter().position(|queued| *queued == id)?;
		self.idle.remove(pos);
		self.handles.get(&id).cloned()
	}

	/// Hand a released handle to the oldest eligible waiter, or park it.
	fn dispatch_or_park(&mut self, mut handle: ChildHandle) {
		let id = handle.id();

		if let Some(mut waiters) = self.specific_waiters.remove(&id) {
			while let Some(waiter) = waiters.pop_front() {
				match waiter.tx.send(Ok(handle)) {
					Ok(()) => {
						if !waiters.is_empty() {
							self.specific_waiters.insert(id, waiters);
						}
						return;
					}
					// Waiter cancelled between park and grant; try the next.
					Err(Ok(returned)) => handle = returned,
					// Only Ok grants are ever sent here.
					Err(Err(_)) => return,
				}
			}
		}

		while let Some(waiter) = self.any_waiters.pop_front() {
			match waiter.tx.send(Ok(handle)) {
				Ok(()) => return,
				Err(Ok(returned)) => handle = returned,
				// Only Ok grants are ever sent here.
				Err(Err(_)) => return,
			}
		}

		self.idle.push_back(id);
	}

	/// Remove every trace of a handle and fail its specific waiters.
	fn purge(&mut self, id: InstanceId) {
		if let Some(handle) = self.handles.remove(&id)
			&& let Some(alias) = handle.alias()
		{
			self.aliases.remove(alias);
		}
		self.idle.retain(|queued| *queued != id);
		if let Some(waiters) = self.specific_waiters.remove(&id) {
			for waiter in waiters {
				let _ = waiter.tx.send(Err(LeaseError::NotFound(id.to_string())));
			}
		}
	}

	fn resolve(&self, key: &LeaseKey) -> Option<InstanceId> {
		match key {
			LeaseKey::Id(id) => {
				let id = InstanceId(*id);
				self.handles.contains_key(&id).then_some(id)
			}
			LeaseKey::Alias(alias) => self.aliases.get(alias).copied(),
		}
	}
}

/// Per-pool lease queue. Internally synchronized.
#[derive(Default, Debug)]
pub struct LeaseQueue {
	state: Mutex<QueueState>,
}

impl LeaseQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a serviceable handle and place it at the tail.
	pub fn register(&self, handle: ChildHandle) {
		let mut state = self.lock();
		let id = handle.id();
		if let Some(alias) = handle.alias() {
			state.aliases.insert(alias.to_string(), id);
		}
		state.handles.insert(id, handle);
		state.idle.push_back(id);
	}

	/// Number of handles still registered (idle or leased).
	#[must_use]
	pub fn serviceable(&self) -> usize {
		self.lock().handles.len()
	}

	/// Lease the handle at the head, blocking until one is available.
	///
	/// Callers are served in arrival order. On cancellation the lease is not
	/// granted and no handle is consumed.
	pub async fn lease_any(&self, cancel: &CancellationToken) -> Result<ChildHandle, LeaseError> {
		let (token, mut rx) = {
			let mut state = self.lock();
			if state.shutting_down {
				return Err(LeaseError::ShuttingDown);
			}
			if let Some(handle) = state.take_idle() {
				return Ok(handle);
			}
			let (tx, rx) = oneshot::channel();
			let token = state.next_token;
			state.next_token += 1;
			state.any_waiters.push_back(Waiter { token, tx });
			(token, rx)
		};

		tokio::select! {
			() = cancel.cancelled() => {
				self.withdraw_any(token, &mut rx);
				Err(LeaseError::Cancelled)
			}
			grant = &mut rx => grant.unwrap_or(Err(LeaseError::ShuttingDown)),
		}
	}

	/// Lease one specific handle, blocking until it is idle.
	///
	/// Unknown keys and failed handles fail immediately with `NotFound`.
	pub async fn lease_specific(
		&self,
		cancel: &CancellationToken,
		key: &LeaseKey,
	) -> Result<ChildHandle, LeaseError> {
		let (id, token, mut rx) = {
			let mut state = self.lock();
			if state.shutting_down {
				return Err(LeaseError::ShuttingDown);
			}
			let Some(id) = state.resolve(key) else {
				return Err(LeaseError::NotFound(key.to_string()));
			};
			let handle = state
				.handles
				.get(&id)
				.cloned()
				.ok_or_else(|| LeaseError::NotFound(key.to_string()))?;
			if handle.state().is_terminal() {
				state.purge(id);
				return Err(LeaseError::NotFound(key.to_string()));
			}
			if let Some(handle) = state.take_idle_specific(id) {
				return Ok(handle);
			}
			let (tx, rx) = oneshot::channel();
			let token = state.next_token;
			state.next_token += 1;
			state
				.specific_waiters
				.entry(id)
				.or_default()
				.push_back(Waiter { token, tx });
			(id, token, rx)
		};

		tokio::select! {
			() = cancel.cancelled() => {
				self.withdraw_specific(id, token, &mut rx);
				Err(LeaseError::Cancelled)
			}
			grant = &mut rx => grant.unwrap_or(Err(LeaseError::ShuttingDown)),
		}
	}

	/// Return a handle to the tail, or drop it if it has failed or stopped.
	pub fn release(&self, handle: ChildHandle) {
		let mut state = self.lock();
		let id = handle.id();

		if handle.state().is_terminal() {
			tracing::info!(instance = %id, state = ?handle.state(), "dropping terminal handle");
			state.purge(id);
			return;
		}
		if state.shutting_down {
			return;
		}
		if !state.handles.contains_key(&id) {
			// Removed while leased; the failure already purged it.
			return;
		}
		state.dispatch_or_park(handle);
	}

	/// Remove a failed handle. No-ops for handles currently leased out; the
	/// lessee's release will observe the terminal state and drop it.
	pub fn remove(&self, id: InstanceId) {
		self.lock().purge(id);
	}

	/// Reject all current and future lease requests.
	pub fn shutdown(&self) {
		let mut state = self.lock();
		state.shutting_down = true;
		state.idle.clear();
		state.handles.clear();
		state.aliases.clear();
		for waiter in state.any_waiters.drain(..) {
			let _ = waiter.tx.send(Err(LeaseError::ShuttingDown));
		}
		for (_, waiters) in state.specific_waiters.drain() {
			for waiter in waiters {
				let _ = waiter.tx.send(Err(LeaseError::ShuttingDown));
			}
		}
	}

	fn withdraw_any(&self, token: u64, rx: &mut oneshot::Receiver<Grant>) {
		{
			let mut state = self.lock();
			state.any_waiters.retain(|waiter| waiter.token != token);
		}
		// A grant may have raced the cancellation; put it back.
		if let Ok(Ok(handle)) = rx.try_recv() {
			self.release(handle);
		}
	}

	fn withdraw_specific(&self, id: InstanceId, token: u64, rx: &mut oneshot::Receiver<Grant>) {
		{
			let mut state = self.lock();
			if let Some(waiters) = state.specific_waiters.get_mut(&id) {
				waiters.retain(|waiter| waiter.token != token);
			}
			if state
				.specific_waiters
				.get(&id)
				.is_some_and(VecDeque::is_empty)
			{
				state.specific_waiters.remove(&id);
			}
		}
		if let Ok(Ok(handle)) = rx.try_recv() {
			self.release(handle);
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
		self.state.lock().expect("lease queue mutex poisoned")
	}
}
