//! Core identifiers, lifecycle states, and status report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pool-local identifier for one child instance (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl std::fmt::Display for InstanceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

/// Lifecycle state of a child process.
///
/// `Failed` and `Stopped` are terminal; a child in either state is never
/// returned by a lease again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
	/// Process spawned, initialize handshake not yet complete.
	Starting,
	/// Handshake complete, idle and available for leasing.
	Ready,
	/// Exclusively held by one tool call.
	Leased,
	/// Unrecoverable stdio error or sustained health-check failure.
	Failed,
	/// Terminated as part of proxy shutdown.
	Stopped,
}

impl ChildState {
	/// Whether the child can never serve another lease.
	#[must_use]
	pub fn is_terminal(self) -> bool {
		matches!(self, ChildState::Failed | ChildState::Stopped)
	}
}

/// Lease metadata, present while a child is exclusively held by a tool call.
///
/// Exposed read-only through [`InstanceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
	/// Id of the leased instance.
	pub instance_id: InstanceId,
	/// Wall-clock time the lease was granted.
	pub started_at: DateTime<Utc>,
}

/// Snapshot of one child's state for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
	/// Pool-local id.
	pub id: InstanceId,
	/// Optional configured alias.
	pub alias: Option<String>,
	/// Current lifecycle state.
	pub state: ChildState,
	/// OS pid of the child process, if it was spawned.
	pub pid: Option<u32>,
	/// Configured browser engine, if any.
	pub browser: Option<String>,
	/// Whether the child runs headless.
	pub headless: bool,
	/// Current lease, if the child is held by a tool call.
	pub lease: Option<LeaseInfo>,
	/// Last time a health probe succeeded.
	pub last_health_ok: Option<DateTime<Utc>>,
	/// Consecutive health-probe failures since the last success.
	pub consecutive_health_failures: u32,
}

/// Snapshot of one pool's state for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
	/// Pool name.
	pub name: String,
	/// Human-readable description from configuration.
	pub description: Option<String>,
	/// Whether this is the registry's default pool.
	pub is_default: bool,
	/// Number of children currently able to serve leases.
	pub healthy_instances: usize,
	/// Total configured children, including failed ones.
	pub total_instances: usize,
	/// Per-child detail.
	pub instances: Vec<InstanceStatus>,
}

/// Error kinds observable to tool callers.
///
/// Rendered on the wire as `{"error": {"kind": <tag>, "message": <str>}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Startup validation failure; the proxy refuses to start.
	ConfigError,
	/// Unknown pool, unknown instance key, or missing blob.
	NotFound,
	/// Alias without a pool matched instances in multiple pools.
	AmbiguousAlias,
	/// Lease request arrived after shutdown was initiated.
	ShuttingDown,
	/// Configured lease-wait ceiling exceeded.
	PoolExhausted,
	/// Child did not reply within the call deadline.
	Timeout,
	/// Child exited or its stdout closed mid-call.
	ChildGone,
	/// Child returned a JSON-RPC error object.
	RemoteError,
	/// Blob exceeded the configured per-blob cap.
	TooLarge,
	/// Caller's cancellation signal fired.
	Cancelled,
	/// Unexpected internal failure.
	Internal,
}

impl ErrorKind {
	/// Build the user-visible failure payload for a tool result.
	#[must_use]
	pub fn to_payload(self, message: &str) -> serde_json::Value {
		serde_json::json!({
			"error": {
				"kind": self,
				"message": message,
			}
		})
	}
}
