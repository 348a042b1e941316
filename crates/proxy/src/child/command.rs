//! Child command-line derivation from effective instance settings.

use std::path::PathBuf;

use pwmcp_proxy_proto::config::LauncherSettings;

/// Program used to launch the MCP server package.
pub const LAUNCHER_PROGRAM: &str = "npx";

/// Package spawned for every child.
pub const MCP_PACKAGE: &str = "@playwright/mcp";

/// Init script bundled for the `enable_stealth` preset.
const STEALTH_SCRIPT: &str = include_str!("../../assets/stealth.js");

fn push_value(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
	if let Some(value) = value {
		args.push(flag.to_string());
		args.push(value.clone());
	}
}

fn push_switch(args: &mut Vec<String>, flag: &str, value: Option<bool>) {
	if value == Some(true) {
		args.push(flag.to_string());
	}
}

/// Build the argv (after the program name) for one child.
///
/// Each populated key of the effective settings contributes one flag; boolean
/// keys contribute their flag only when true.
#[must_use]
pub fn build_args(settings: &LauncherSettings) -> Vec<String> {
	let mut args = vec![MCP_PACKAGE.to_string()];

	push_value(&mut args, "--browser", &settings.browser);
	push_switch(&mut args, "--headless", settings.headless);
	push_switch(&mut args, "--no-sandbox", settings.no_sandbox);
	push_value(&mut args, "--device", &settings.device);
	push_value(&mut args, "--viewport-size", &settings.viewport_size);
	push_switch(&mut args, "--isolated", settings.isolated);
	push_value(&mut args, "--user-data-dir", &settings.user_data_dir);
	push_value(&mut args, "--storage-state", &settings.storage_state);
	push_value(&mut args, "--allowed-origins", &settings.allowed_origins);
	push_value(&mut args, "--blocked-origins", &settings.blocked_origins);
	push_value(&mut args, "--proxy-server", &settings.proxy_server);
	push_value(&mut args, "--caps", &settings.caps);
	push_switch(&mut args, "--save-session", settings.save_session);
	push_switch(&mut args, "--save-trace", settings.save_trace);
	push_value(&mut args, "--save-video", &settings.save_video);
	push_value(&mut args, "--output-dir", &settings.output_dir);
	if let Some(ms) = settings.timeout_action {
		args.push("--timeout-action".to_string());
		args.push(ms.to_string());
	}
	if let Some(ms) = settings.timeout_navigation {
		args.push("--timeout-navigation".to_string());
		args.push(ms.to_string());
	}
	push_value(&mut args, "--image-responses", &settings.image_responses);
	push_value(&mut args, "--user-agent", &settings.user_agent);
	push_value(&mut args, "--init-script", &settings.init_script);
	push_switch(&mut args, "--ignore-https-errors", settings.ignore_https_errors);
	push_switch(&mut args, "--extension", settings.extension);
	push_value(&mut args, "--extension-token", &settings.extension_token);

	args
}

/// Materialize the bundled stealth init script on disk and return its path.
///
/// Written once per user cache directory; the OS temp dir is the fallback
/// when no cache directory is available.
pub fn ensure_stealth_script() -> std::io::Result<PathBuf> {
	let dir = dirs::cache_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("pwmcp-proxy");
	std::fs::create_dir_all(&dir)?;
	let path = dir.join("stealth.js");
	if !path.exists() {
		std::fs::write(&path, STEALTH_SCRIPT)?;
	}
	Ok(path)
}
