//! The front door for every inbound tool call.
//!
//! For each invocation the dispatcher strips the proxy-level routing
//! parameters, resolves a pool and lease hint, acquires a child under a
//! scoped guard (released exactly once on every exit path), forwards the
//! call over the child's stdio, runs binary interception on the result, and
//! mediates snapshot-cache reads and writes.
//!
//! ```text
//! Resolve → Acquire → [cache hit?] → Release → return
//!                    ↓ no
//!                    Call child → Intercept → [snapshot?] → Paginate+Cache
//!                    ↓
//!                    Release → return
//! ```
//!
//! A snapshot call that names a live `cache_key` and a known page is served
//! straight from the cache without taking a lease at all. The bulk tool
//! holds a single lease for its whole command list.

mod processor;

use std::sync::Arc;

pub use processor::{LineProcessor, ProcessOptions, SnapshotProcessor};
use pwmcp_proxy_proto::types::ErrorKind;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::child::{CallError, ChildHandle};
use crate::intercept::Interceptor;
use crate::pool::{LeaseError, LeaseGuard};
use crate::registry::{PoolRegistry, ResolveError};
use crate::snapshot::{SnapshotCache, SnapshotPage};

/// Tool executing a command list under one lease.
const BULK_TOOL: &str = "browser_execute_bulk";

/// Status tool served by the dispatcher itself, without a lease.
const POOL_STATUS_TOOL: &str = "browser_pool_status";

/// Tools whose results feed the snapshot cache.
const SNAPSHOT_TOOLS: &[&str] = &["browser_snapshot", "browser_query_snapshot"];

/// Errors surfaced by [`Dispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("invalid arguments: {0}")]
	InvalidArgs(String),

	#[error(transparent)]
	Resolve(#[from] ResolveError),

	#[error(transparent)]
	Lease(#[from] LeaseError),

	#[error(transparent)]
	Call(#[from] CallError),
}

impl DispatchError {
	/// The caller-observable error kind.
	#[must_use]
	pub fn kind(&self) -> ErrorKind {
		match self {
			DispatchError::InvalidArgs(_) => ErrorKind::Internal,
			DispatchError::Resolve(
				ResolveError::UnknownPool(_) | ResolveError::UnknownAlias(_),
			) => ErrorKind::NotFound,
			DispatchError::Resolve(ResolveError::AmbiguousAlias { .. }) => {
				ErrorKind::AmbiguousAlias
			}
			DispatchError::Lease(LeaseError::NotFound(_)) => ErrorKind::NotFound,
			DispatchError::Lease(LeaseError::ShuttingDown) => ErrorKind::ShuttingDown,
			DispatchError::Lease(LeaseError::Cancelled) => ErrorKind::Cancelled,
			DispatchError::Lease(LeaseError::Exhausted) => ErrorKind::PoolExhausted,
			DispatchError::Call(CallError::Timeout(_)) => ErrorKind::Timeout,
			DispatchError::Call(CallError::ChildGone) => ErrorKind::ChildGone,
			DispatchError::Call(CallError::Cancelled) => ErrorKind::Cancelled,
			DispatchError::Call(CallError::Remote { .. }) => ErrorKind::RemoteError,
			DispatchError::Call(CallError::Encode(_)) => ErrorKind::Internal,
		}
	}

	/// The user-visible failure payload.
	#[must_use]
	pub fn to_payload(&self) -> Value {
		self.kind().to_payload(&self.to_string())
	}
}

/// Snapshot post-processing parameters extracted from the call arguments.
struct PageOptions {
	/// Whether any post-processing key was supplied at all.
	requested: bool,
	cache_key: Option<String>,
	query: Option<String>,
	flatten: bool,
	limit: usize,
	offset: usize,
	output_format: String,
}

/// Entry point invoked by the outer MCP server for every tool call.
pub struct Dispatcher {
	registry: Arc<PoolRegistry>,
	snapshots: Arc<SnapshotCache>,
	interceptor: Interceptor,
	processor: Arc<dyn SnapshotProcessor>,
}

impl Dispatcher {
	/// Assemble the dispatcher over the shared stores.
	#[must_use]
	pub fn new(
		registry: Arc<PoolRegistry>,
		blobs: Arc<BlobStore>,
		snapshots: Arc<SnapshotCache>,
		inline_threshold: usize,
	) -> Self {
		Self {
			registry,
			snapshots,
			interceptor: Interceptor::new(blobs, inline_threshold),
			processor: Arc::new(LineProcessor),
		}
	}

	/// Replace the built-in snapshot processor with an external engine.
	#[must_use]
	pub fn with_processor(mut self, processor: Arc<dyn SnapshotProcessor>) -> Self {
		self.processor = processor;
		self
	}

	/// Route one inbound tool call.
	pub async fn dispatch(
		&self,
		tool: &str,
		args: Value,
		cancel: &CancellationToken,
	) -> Result<Value, DispatchError> {
		let mut args = match args {
			Value::Object(map) => map,
			Value::Null => Map::new(),
			_ => {
				return Err(DispatchError::InvalidArgs(
					"tool arguments must be an object".to_string(),
				));
			}
		};

		if tool == POOL_STATUS_TOOL {
			let pool_name = take_string(&mut args, "pool_name");
			let pools = self.registry.status(pool_name.as_deref())?;
			return Ok(json!({ "pools": pools }));
		}

		let pool_sel = take_string(&mut args, "browser_pool");
		let instance_sel = take_string(&mut args, "browser_instance");

		let page_opts = if SNAPSHOT_TOOLS.contains(&tool) {
			Some(extract_page_options(&mut args)?)
		} else {
			None
		};

		// Cache short-circuit: a known page needs no child and no lease.
		if let Some(opts) = &page_opts
			&& let Some(key) = &opts.cache_key
		{
			let page_index = opts.offset / opts.limit;
			if let Some(page) = self.snapshots.lookup(key, page_index)
				&& page.page_size == opts.limit
			{
				tracing::debug!(tool, fingerprint = %key, page_index, "snapshot cache hit");
				return Ok(page_payload(&page, key));
			}
		}

		let (pool, hint) = self
			.registry
			.resolve(pool_sel.as_deref(), instance_sel.as_deref())?;

		let guard = pool.lease(cancel, &hint).await?;

		if tool == BULK_TOOL {
			return self.run_bulk(&guard, args, cancel).await;
		}

		let raw = call_with_cancel(guard.child(), tool, Value::Object(args), cancel).await?;
		let result = self.interceptor.transform(tool, raw).await;

		if let Some(opts) = page_opts
			&& opts.requested
		{
			return Ok(self.paginate_and_cache(&result, &opts));
		}
		Ok(result)
	}

	/// Execute a command list on one leased child.
	///
	/// Each sub-command is individually intercepted. With `stop_on_error`
	/// the loop halts on the first failure and returns the partial results;
	/// otherwise errors accumulate per command. The single lease is released
	/// by the caller's guard exactly once.
	async fn run_bulk(
		&self,
		guard: &LeaseGuard,
		mut args: Map<String, Value>,
		cancel: &CancellationToken,
	) -> Result<Value, DispatchError> {
		let commands = match args.remove("commands") {
			Some(Value::Array(commands)) => commands,
			_ => {
				return Err(DispatchError::InvalidArgs(
					"browser_execute_bulk requires a commands array".to_string(),
				));
			}
		};
		let stop_on_error = take_bool(&mut args, &["stop_on_error", "stopOnError"]);

		let mut results = Vec::new();
		let mut errors = Vec::new();

		for (index, command) in commands.into_iter().enumerate() {
			let tool = command
				.get("tool")
				.or_else(|| command.get("name"))
				.and_then(Value::as_str)
				.map(str::to_string);
			let Some(tool) = tool else {
				errors.push(json!({
					"index": index,
					"kind": ErrorKind::Internal,
					"message": "sub-command has no tool name",
				}));
				if stop_on_error {
					break;
				}
				continue;
			};
			let sub_args = command
				.get("args")
				.or_else(|| command.get("arguments"))
				.cloned()
				.unwrap_or_else(|| json!({}));

			match call_with_cancel(guard.child(), &tool, sub_args, cancel).await {
				Ok(raw) => results.push(self.interceptor.transform(&tool, raw).await),
				Err(CallError::Cancelled) => return Err(CallError::Cancelled.into()),
				Err(e) => {
					let gone = matches!(e, CallError::ChildGone);
					let failure = DispatchError::Call(e);
					errors.push(json!({
						"index": index,
						"tool": tool,
						"kind": failure.kind(),
						"message": failure.to_string(),
					}));
					if gone || stop_on_error {
						break;
					}
				}
			}
		}

		Ok(json!({ "results": results, "errors": errors }))
	}

	/// Post-process a snapshot result: query, paginate, cache, and wrap the
	/// requested page.
	fn paginate_and_cache(&self, result: &Value, opts: &PageOptions) -> Value {
		let Some(raw) = raw_snapshot_payload(result) else {
			tracing::debug!("snapshot result carries no recognizable payload");
			return result.clone();
		};

		let fingerprint = fingerprint(raw, opts);
		let items = self.processor.process(
			raw,
			&ProcessOptions {
				query: opts.query.clone(),
				flatten: opts.flatten,
				output_format: opts.output_format.clone(),
			},
		);
		let total_items = items.len();
		let pages: Vec<String> = if items.is_empty() {
			vec![String::new()]
		} else {
			items
				.chunks(opts.limit)
				.map(|chunk| chunk.join("\n"))
				.collect()
		};
		let total_pages = pages.len();

		self.snapshots.store(
			&fingerprint,
			&opts.output_format,
			pages,
			opts.limit,
			total_items,
		);

		let page_index = opts.offset / opts.limit;
		match self.snapshots.lookup(&fingerprint, page_index) {
			Some(page) => page_payload(&page, &fingerprint),
			// Requested page beyond the end: empty page, nothing more.
			None => json!({
				"page": "",
				"totalPages": total_pages,
				"totalItems": total_items,
				"hasMore": false,
				"fingerprint": fingerprint,
			}),
		}
	}
}

/// Forward one call, guaranteeing frame integrity under cancellation.
///
/// The call itself runs as a detached task: on cancellation the request
/// frame still completes (writes are serialized under the child's writer
/// mutex) and the eventual reply is discarded by the reader.
async fn call_with_cancel(
	child: &ChildHandle,
	tool: &str,
	args: Value,
	cancel: &CancellationToken,
) -> Result<Value, CallError> {
	let task = {
		let child = child.clone();
		let tool = tool.to_string();
		tokio::spawn(async move { child.call(&tool, args, None).await })
	};

	tokio::select! {
		() = cancel.cancelled() => Err(CallError::Cancelled),
		result = task => result.unwrap_or_else(|_| Err(CallError::ChildGone)),
	}
}

fn page_payload(page: &SnapshotPage, fingerprint: &str) -> Value {
	json!({
		"page": page.page,
		"totalPages": page.total_pages,
		"totalItems": page.total_items,
		"hasMore": page.has_more,
		"fingerprint": fingerprint,
	})
}

/// The raw snapshot text inside a tool result.
fn raw_snapshot_payload(result: &Value) -> Option<&str> {
	if let Some(snapshot) = result.get("snapshot").and_then(Value::as_str) {
		return Some(snapshot);
	}
	result.get("content")?.get(0)?.get("text")?.as_str()
}

/// Stable fingerprint over the raw payload and post-processing parameters.
fn fingerprint(raw: &str, opts: &PageOptions) -> String {
	let mut hasher = Sha256::new();
	hasher.update(raw.as_bytes());
	hasher.update([0]);
	hasher.update(opts.query.as_deref().unwrap_or_default().as_bytes());
	hasher.update([0, u8::from(opts.flatten), 0]);
	hasher.update(opts.output_format.as_bytes());
	let digest = hasher.finalize();
	digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn extract_page_options(args: &mut Map<String, Value>) -> Result<PageOptions, DispatchError> {
	let cache_key = take_string(args, "cache_key");
	let query = take_string(args, "query");
	let flatten = args.remove("flatten");
	let limit = args.remove("limit");
	let offset = args.remove("offset");
	let output_format = take_string(args, "output_format");

	let requested = cache_key.is_some()
		|| query.is_some()
		|| flatten.is_some()
		|| limit.is_some()
		|| offset.is_some()
		|| output_format.is_some();

	let limit = match limit {
		Some(value) => value
			.as_u64()
			.and_then(|limit| usize::try_from(limit).ok())
			.filter(|limit| *limit > 0)
			.ok_or_else(|| {
				DispatchError::InvalidArgs("limit must be a positive integer".to_string())
			})?,
		None => 50,
	};
	let offset = match offset {
		Some(value) => value
			.as_u64()
			.and_then(|offset| usize::try_from(offset).ok())
			.ok_or_else(|| {
				DispatchError::InvalidArgs("offset must be a non-negative integer".to_string())
			})?,
		None => 0,
	};
	if offset % limit != 0 {
		return Err(DispatchError::InvalidArgs(
			"offset must be a multiple of limit".to_string(),
		));
	}
	let flatten = flatten.as_ref().and_then(Value::as_bool).unwrap_or(false);

	Ok(PageOptions {
		requested,
		cache_key,
		query,
		flatten,
		limit,
		offset,
		output_format: output_format.unwrap_or_else(|| "yaml".to_string()),
	})
}

fn take_string(args: &mut Map<String, Value>, key: &str) -> Option<String> {
	match args.remove(key) {
		Some(Value::String(s)) => Some(s),
		Some(Value::Number(n)) => Some(n.to_string()),
		Some(_) | None => None,
	}
}

fn take_bool(args: &mut Map<String, Value>, keys: &[&str]) -> bool {
	keys.iter()
		.find_map(|key| args.remove(*key))
		.as_ref()
		.and_then(Value::as_bool)
		.unwrap_or(false)
}

#[cfg(test)]
mod tests;
