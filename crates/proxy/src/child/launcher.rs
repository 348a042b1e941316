//! Child process launcher abstraction for production and testing.

use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use super::ChildConfig;
use super::command::{LAUNCHER_PROGRAM, build_args};

/// Stdio pair and process handle produced by a launcher.
pub struct ChildProcess {
	/// Write half of the child's stdin.
	pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
	/// Read half of the child's stdout.
	pub stdout: Box<dyn AsyncRead + Send + Unpin>,
	/// OS pid, absent for in-process fakes.
	pub pid: Option<u32>,
	/// Process handle kept for termination, absent for in-process fakes.
	pub process: Option<tokio::process::Child>,
}

/// Trait for launching child instances.
///
/// The proxy uses real `npx @playwright/mcp` subprocesses in production and
/// in-process fakes over [`tokio::io::duplex`] pipes in tests.
pub trait ChildLauncher: Send + Sync + 'static {
	/// Launch one child for the given frozen instance configuration.
	fn launch(
		&self,
		config: &ChildConfig,
	) -> Pin<Box<dyn Future<Output = std::io::Result<ChildProcess>> + Send>>;
}

/// Production launcher spawning real `playwright-mcp` processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
	/// Create a new process launcher.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

impl ChildLauncher for ProcessLauncher {
	fn launch(
		&self,
		config: &ChildConfig,
	) -> Pin<Box<dyn Future<Output = std::io::Result<ChildProcess>> + Send>> {
		let args = build_args(&config.settings);
		let pool = config.pool.clone();
		let id = config.id;

		Box::pin(async move {
			let mut child = tokio::process::Command::new(LAUNCHER_PROGRAM)
				.args(&args)
				.stdin(Stdio::piped())
				.stdout(Stdio::piped())
				.stderr(Stdio::piped())
				.kill_on_drop(true)
				.spawn()?;

			let stdin = child
				.stdin
				.take()
				.ok_or_else(|| std::io::Error::other("child stdin not captured"))?;
			let stdout = child
				.stdout
				.take()
				.ok_or_else(|| std::io::Error::other("child stdout not captured"))?;

			// Drain stderr into the log sink for the child's lifetime.
			if let Some(stderr) = child.stderr.take() {
				let pool = pool.clone();
				tokio::spawn(async move {
					let mut lines = BufReader::new(stderr).lines();
					while let Ok(Some(line)) = lines.next_line().await {
						tracing::warn!(pool = %pool, instance = %id, "child stderr: {line}");
					}
				});
			}

			let pid = child.id();
			tracing::info!(pool = %pool, instance = %id, ?pid, "spawned child process");

			Ok(ChildProcess {
				stdin: Box::new(stdin),
				stdout: Box::new(stdout),
				pid,
				process: Some(child),
			})
		})
	}
}
