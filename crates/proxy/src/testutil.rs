//! Shared test fakes: an in-process child speaking JSON-RPC over duplex pipes.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pwmcp_proxy_proto::config::LauncherSettings;
use pwmcp_proxy_proto::types::InstanceId;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};

use crate::child::{ChildConfig, ChildLauncher, ChildProcess};

/// Scripted behavior for one request hitting the fake child.
pub enum FakeReply {
	/// Reply immediately with a result.
	Result(Value),
	/// Reply immediately with a JSON-RPC error object.
	Error { code: i64, message: String },
	/// Reply with a result after a delay (drives out-of-order tests).
	Delayed(Duration, Value),
	/// Never reply.
	Ignore,
	/// Emit a non-JSON line, then keep serving.
	Garbage,
	/// Close both stdio halves, simulating a crash.
	Exit,
}

/// Per-method script; `None` falls back to the built-in MCP defaults.
pub type Script = Arc<dyn Fn(&str, &Value) -> Option<FakeReply> + Send + Sync>;

type SharedWriter = Arc<tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>>;

/// Launcher producing in-process fake children over duplex pipes.
#[derive(Clone)]
pub struct FakeLauncher {
	script: Script,
	/// Requests and notifications the fake children received, in order.
	pub received: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Default for FakeLauncher {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeLauncher {
	/// A launcher whose children answer only the built-in MCP defaults.
	#[must_use]
	pub fn new() -> Self {
		Self::with_script(|_, _| None)
	}

	/// A launcher whose children consult `script` before the defaults.
	pub fn with_script(
		script: impl Fn(&str, &Value) -> Option<FakeReply> + Send + Sync + 'static,
	) -> Self {
		Self {
			script: Arc::new(script),
			received: Arc::new(Mutex::new(Vec::new())),
		}
	}

	/// Methods received so far, for handshake and routing assertions.
	pub fn received_methods(&self) -> Vec<String> {
		self.received
			.lock()
			.unwrap()
			.iter()
			.map(|(m, _)| m.clone())
			.collect()
	}

	/// Params of the first received request with the given method.
	pub fn params_of(&self, method: &str) -> Option<Value> {
		self.received
			.lock()
			.unwrap()
			.iter()
			.find(|(m, _)| m == method)
			.map(|(_, p)| p.clone())
	}
}

impl ChildLauncher for FakeLauncher {
	fn launch(
		&self,
		_config: &ChildConfig,
	) -> Pin<Box<dyn Future<Output = std::io::Result<ChildProcess>> + Send>> {
		let script = self.script.clone();
		let received = self.received.clone();
		Box::pin(async move {
			let (proxy_side, fake_side) = tokio::io::duplex(256 * 1024);
			let (proxy_read, proxy_write) = tokio::io::split(proxy_side);
			let (fake_read, fake_write) = tokio::io::split(fake_side);
			let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(fake_write)));

			tokio::spawn(respond_loop(fake_read, writer, script, received));

			Ok(ChildProcess {
				stdin: Box::new(proxy_write),
				stdout: Box::new(proxy_read),
				pid: None,
				process: None,
			})
		})
	}
}

/// A launcher that fails every spawn with an I/O error.
#[derive(Clone, Default)]
pub struct BrokenLauncher;

impl ChildLauncher for BrokenLauncher {
	fn launch(
		&self,
		_config: &ChildConfig,
	) -> Pin<Box<dyn Future<Output = std::io::Result<ChildProcess>> + Send>> {
		Box::pin(async { Err(std::io::Error::other("spawn refused")) })
	}
}

async fn respond_loop(
	reader: tokio::io::ReadHalf<DuplexStream>,
	writer: SharedWriter,
	script: Script,
	received: Arc<Mutex<Vec<(String, Value)>>>,
) {
	let mut lines = BufReader::new(reader).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		let Ok(value) = serde_json::from_str::<Value>(&line) else {
			continue;
		};
		let method = value["method"].as_str().unwrap_or_default().to_string();
		let params = value.get("params").cloned().unwrap_or(Value::Null);
		received.lock().unwrap().push((method.clone(), params.clone()));

		let Some(id) = value.get("id").and_then(Value::as_u64) else {
			continue;
		};

		let reply = script(&method, &params).unwrap_or_else(|| default_reply(&method));
		match reply {
			FakeReply::Result(result) => write_result(&writer, id, &result).await,
			FakeReply::Error { code, message } => {
				write_line(
					&writer,
					&json!({
						"jsonrpc": "2.0",
						"id": id,
						"error": {"code": code, "message": message},
					})
					.to_string(),
				)
				.await;
			}
			FakeReply::Delayed(delay, result) => {
				let writer = writer.clone();
				tokio::spawn(async move {
					tokio::time::sleep(delay).await;
					write_result(&writer, id, &result).await;
				});
			}
			FakeReply::Ignore => {}
			FakeReply::Garbage => write_line(&writer, "this is not json").await,
			FakeReply::Exit => {
				*writer.lock().await = None;
				break;
			}
		}
	}
}

fn default_reply(method: &str) -> FakeReply {
	match method {
		"initialize" => FakeReply::Result(json!({
			"protocolVersion": "2024-11-05",
			"capabilities": {"tools": {}},
			"serverInfo": {"name": "fake-playwright-mcp", "version": "0.0.1"},
		})),
		"tools/list" => FakeReply::Result(json!({
			"tools": [
				{"name": "browser_navigate"},
				{"name": "browser_snapshot"},
				{"name": "browser_screenshot"},
			],
		})),
		"ping" => FakeReply::Result(json!({})),
		_ => FakeReply::Error {
			code: -32601,
			message: format!("method not found: {method}"),
		},
	}
}

async fn write_result(writer: &SharedWriter, id: u64, result: &Value) {
	write_line(
		writer,
		&json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
	)
	.await;
}

async fn write_line(writer: &SharedWriter, line: &str) {
	let mut writer = writer.lock().await;
	if let Some(writer) = writer.as_mut() {
		let _ = writer.write_all(line.as_bytes()).await;
		let _ = writer.write_all(b"\n").await;
		let _ = writer.flush().await;
	}
}

/// Child config with production-default timing, for supervisor tests.
#[must_use]
pub fn child_config(id: u32) -> ChildConfig {
	ChildConfig {
		id: InstanceId(id),
		pool: "default".to_string(),
		alias: None,
		settings: LauncherSettings::default(),
		startup_timeout: Duration::from_secs(60),
		call_timeout: Duration::from_secs(90),
		probe_timeout: Duration::from_secs(5),
	}
}
