//! JSON-RPC 2.0 wire types for the child's stdio.
//!
//! The proxy speaks newline-delimited JSON-RPC 2.0 to each `playwright-mcp`
//! child: one UTF-8 JSON object per line, no BOM. Requests always carry an
//! integer id allocated by the supervisor; responses are correlated back by
//! that id. Notifications flow both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version stamped on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
	pub jsonrpc: &'static str,
	pub id: u64,
	pub method: String,
	pub params: Value,
}

impl RpcRequest {
	/// Create a request frame for the given id, method, and params.
	#[must_use]
	pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id,
			method: method.into(),
			params,
		}
	}
}

/// An outbound notification frame (no id, no reply expected).
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
	pub jsonrpc: &'static str,
	pub method: String,
	pub params: Value,
}

impl RpcNotification {
	/// Create a notification frame for the given method and params.
	#[must_use]
	pub fn new(method: impl Into<String>, params: Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			method: method.into(),
			params,
		}
	}
}

/// A JSON-RPC error object from a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// A frame read from the child's stdout, classified by shape.
#[derive(Debug)]
pub enum Inbound {
	/// Reply to one of our requests, keyed by the id we allocated.
	Response {
		id: u64,
		result: Result<Value, RpcError>,
	},
	/// Server-initiated notification (e.g. `notifications/progress`).
	Notification { method: String, params: Value },
	/// Server-initiated request. The proxy does not answer these.
	Request { id: Value, method: String },
}

/// Errors classifying a stdout line as a JSON-RPC frame.
#[derive(Debug, Error)]
pub enum WireError {
	#[error("invalid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("malformed JSON-RPC frame: {0}")]
	Malformed(&'static str),
}

impl Inbound {
	/// Parse one stdout line into a classified frame.
	///
	/// Classification follows the JSON-RPC 2.0 shape: a `method` without an
	/// `id` is a notification, a `method` with an `id` is a server-initiated
	/// request, and an `id` with `result` or `error` is a response.
	pub fn parse(line: &str) -> Result<Self, WireError> {
		let value: Value = serde_json::from_str(line)?;
		let Value::Object(mut obj) = value else {
			return Err(WireError::Malformed("frame is not a JSON object"));
		};

		let id = obj.remove("id");
		let method = obj.remove("method");

		match (id, method) {
			(None, Some(method)) => {
				let Value::String(method) = method else {
					return Err(WireError::Malformed("method is not a string"));
				};
				let params = obj.remove("params").unwrap_or(Value::Null);
				Ok(Inbound::Notification { method, params })
			}
			(Some(id), Some(method)) => {
				let Value::String(method) = method else {
					return Err(WireError::Malformed("method is not a string"));
				};
				Ok(Inbound::Request { id, method })
			}
			(Some(id), None) => {
				let Some(id) = id.as_u64() else {
					return Err(WireError::Malformed("response id is not an integer"));
				};
				if let Some(error) = obj.remove("error") {
					let error: RpcError = serde_json::from_value(error)?;
					Ok(Inbound::Response {
						id,
						result: Err(error),
					})
				} else if let Some(result) = obj.remove("result") {
					Ok(Inbound::Response {
						id,
						result: Ok(result),
					})
				} else {
					Err(WireError::Malformed("response has neither result nor error"))
				}
			}
			(None, None) => Err(WireError::Malformed("frame has neither id nor method")),
		}
	}
}
