//! Hierarchical configuration: Global, Pool, and Instance strata.
//!
//! Configuration is read from environment variables under the
//! `PW_MCP_PROXY_` prefix:
//!
//! - Global: `PW_MCP_PROXY_<KEY>=<v>`
//! - Pool: `PW_MCP_PROXY__<POOL>_<KEY>=<v>`
//! - Instance: `PW_MCP_PROXY__<POOL>__<ID>_<KEY>=<v>`
//!
//! A single underscore after the prefix selects the global stratum; a double
//! underscore selects a pool (and `__<ID>_` within it an instance). Pool
//! names and keys are uppercase alphanumeric plus underscore, which makes the
//! split ambiguous in general; the loader resolves it by matching the longest
//! known key as a suffix of the variable name. Precedence when materializing
//! one child's effective settings is Instance > Pool > Global.
//!
//! Some keys are stratum-restricted: `INSTANCES`, `IS_DEFAULT`, and
//! `DESCRIPTION` are pool-only, `ALIAS` is instance-only, and the blob-store
//! and operational tunables are global-only. Violations are fatal at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Prefix shared by every proxy environment variable.
pub const ENV_PREFIX: &str = "PW_MCP_PROXY_";

/// User agent applied by the `enable_stealth` macro when none is configured.
pub const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
	AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Launcher settings accepted at any stratum; every key optional.
///
/// Each populated key maps to one `playwright-mcp` command-line flag when the
/// child's argv is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LauncherSettings {
	pub browser: Option<String>,
	pub headless: Option<bool>,
	pub no_sandbox: Option<bool>,
	pub device: Option<String>,
	pub viewport_size: Option<String>,
	pub isolated: Option<bool>,
	pub user_data_dir: Option<String>,
	pub storage_state: Option<String>,
	pub allowed_origins: Option<String>,
	pub blocked_origins: Option<String>,
	pub proxy_server: Option<String>,
	pub caps: Option<String>,
	pub save_session: Option<bool>,
	pub save_trace: Option<bool>,
	pub save_video: Option<String>,
	pub output_dir: Option<String>,
	pub timeout_action: Option<u64>,
	pub timeout_navigation: Option<u64>,
	pub image_responses: Option<String>,
	pub user_agent: Option<String>,
	pub init_script: Option<String>,
	pub ignore_https_errors: Option<bool>,
	pub extension: Option<bool>,
	pub extension_token: Option<String>,
	pub enable_stealth: Option<bool>,
}

macro_rules! overlay_fields {
	($dst:expr, $src:expr, [$($field:ident),* $(,)?]) => {
		$(
			if $src.$field.is_some() {
				$dst.$field = $src.$field.clone();
			}
		)*
	};
}

impl LauncherSettings {
	/// Apply every populated key of `other` over `self`.
	pub fn overlay(&mut self, other: &LauncherSettings) {
		overlay_fields!(self, other, [
			browser,
			headless,
			no_sandbox,
			device,
			viewport_size,
			isolated,
			user_data_dir,
			storage_state,
			allowed_origins,
			blocked_origins,
			proxy_server,
			caps,
			save_session,
			save_trace,
			save_video,
			output_dir,
			timeout_action,
			timeout_navigation,
			image_responses,
			user_agent,
			init_script,
			ignore_https_errors,
			extension,
			extension_token,
			enable_stealth,
		]);
	}

	/// Merge the three strata with Instance > Pool > Global precedence.
	#[must_use]
	pub fn merged(
		global: &LauncherSettings,
		pool: &LauncherSettings,
		instance: Option<&LauncherSettings>,
	) -> LauncherSettings {
		let mut out = global.clone();
		out.overlay(pool);
		if let Some(instance) = instance {
			out.overlay(instance);
		}
		out
	}

	/// Expand the `enable_stealth` macro.
	///
	/// When stealth is enabled, keys that no stratum set receive the stealth
	/// defaults: the bundled init script, headed mode, and a recent Chrome
	/// user agent. Keys set at any stratum remain in effect.
	pub fn apply_stealth_defaults(&mut self, bundled_script: &str) {
		if self.enable_stealth != Some(true) {
			return;
		}
		if self.init_script.is_none() {
			self.init_script = Some(bundled_script.to_string());
		}
		if self.headless.is_none() {
			self.headless = Some(false);
		}
		if self.user_agent.is_none() {
			self.user_agent = Some(STEALTH_USER_AGENT.to_string());
		}
	}
}

/// Operational tunables; global stratum only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
	/// Window for a child to complete the initialize handshake.
	pub startup_timeout: Duration,
	/// Default per-call deadline for tool calls.
	pub call_timeout: Duration,
	/// Deadline for a health probe.
	pub probe_timeout: Duration,
	/// Interval between health-check sweeps.
	pub health_check_interval: Duration,
	/// Consecutive probe failures before a child is failed.
	pub health_failure_threshold: u32,
	/// Grace period per escalation step during shutdown.
	pub shutdown_grace: Duration,
	/// Optional ceiling on lease waits; unbounded when absent.
	pub lease_wait_ceiling: Option<Duration>,
	/// Lifetime of snapshot cache entries.
	pub snapshot_ttl: Duration,
}

impl Default for ProxySettings {
	fn default() -> Self {
		Self {
			startup_timeout: Duration::from_secs(60),
			call_timeout: Duration::from_secs(90),
			probe_timeout: Duration::from_secs(5),
			health_check_interval: Duration::from_secs(20),
			health_failure_threshold: 3,
			shutdown_grace: Duration::from_secs(5),
			lease_wait_ceiling: None,
			snapshot_ttl: Duration::from_secs(600),
		}
	}
}

/// Blob store settings; global stratum only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSettings {
	/// Storage root; a directory under the OS temp dir when unset.
	pub storage_root: Option<PathBuf>,
	/// Per-blob size cap.
	pub max_bytes: u64,
	/// Decoded size above which interception replaces a field with a blob.
	pub inline_threshold: usize,
	/// Lifetime of stored blobs.
	pub ttl: Duration,
	/// Interval between sweeper runs.
	pub sweep_interval: Duration,
}

impl Default for BlobSettings {
	fn default() -> Self {
		Self {
			storage_root: None,
			max_bytes: 500 * 1024 * 1024,
			inline_threshold: 50 * 1024,
			ttl: Duration::from_secs(24 * 60 * 60),
			sweep_interval: Duration::from_secs(60 * 60),
		}
	}
}

/// Per-instance overrides within a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceConfig {
	/// Optional alias; must be unique within the pool and non-numeric.
	pub alias: Option<String>,
	/// Instance-stratum launcher settings.
	pub settings: LauncherSettings,
}

/// One pool's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
	/// Pool name (lowercased form of the env segment).
	pub name: String,
	/// Human-readable description.
	pub description: Option<String>,
	/// Whether this is the default pool.
	pub is_default: bool,
	/// Number of child instances; must be at least 1.
	pub instances: u32,
	/// Pool-stratum launcher settings.
	pub settings: LauncherSettings,
	/// Instance overrides keyed by 0-based id.
	pub overrides: BTreeMap<u32, InstanceConfig>,
}

impl PoolConfig {
	fn new(name: String) -> Self {
		Self {
			name,
			description: None,
			is_default: false,
			instances: 0,
			settings: LauncherSettings::default(),
			overrides: BTreeMap::new(),
		}
	}

	/// Effective launcher settings for one instance, stealth expanded.
	#[must_use]
	pub fn effective_settings(
		&self,
		global: &LauncherSettings,
		id: u32,
		bundled_stealth_script: &str,
	) -> LauncherSettings {
		let instance = self.overrides.get(&id).map(|o| &o.settings);
		let mut settings = LauncherSettings::merged(global, &self.settings, instance);
		settings.apply_stealth_defaults(bundled_stealth_script);
		settings
	}

	/// Alias configured for an instance id, if any.
	#[must_use]
	pub fn alias_of(&self, id: u32) -> Option<&str> {
		self.overrides.get(&id).and_then(|o| o.alias.as_deref())
	}
}

/// The frozen configuration tree: global settings plus all pools.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
	/// Global-stratum launcher settings.
	pub global: LauncherSettings,
	/// Operational tunables.
	pub proxy: ProxySettings,
	/// Blob store settings.
	pub blob: BlobSettings,
	/// Pools keyed by name.
	pub pools: BTreeMap<String, PoolConfig>,
}

/// Errors raised while loading or validating configuration.
///
/// All are fatal: the proxy refuses to start on any of them.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("unrecognized configuration variable {var}")]
	UnknownKey { var: String },

	#[error("malformed configuration variable {var}")]
	BadFormat { var: String },

	#[error("invalid value for {var}: expected {expected}")]
	InvalidValue { var: String, expected: &'static str },

	#[error("{key} may only be set at the {allowed} stratum (violated by {var})")]
	StratumViolation {
		var: String,
		key: &'static str,
		allowed: &'static str,
	},

	#[error("no pools configured; declare at least PW_MCP_PROXY__<POOL>_INSTANCES")]
	NoPools,

	#[error("pool {pool} does not declare INSTANCES >= 1")]
	MissingInstances { pool: String },

	#[error("no pool is marked IS_DEFAULT=true")]
	NoDefaultPool,

	#[error("multiple pools marked IS_DEFAULT=true: {pools:?}")]
	MultipleDefaultPools { pools: Vec<String> },

	#[error("pool {pool} overrides instance {id}, outside [0, {instances})")]
	OverrideOutOfRange { pool: String, id: u32, instances: u32 },

	#[error("pool {pool} assigns alias {alias:?} to more than one instance")]
	DuplicateAlias { pool: String, alias: String },

	#[error("alias {alias:?} is all digits, which is reserved for numeric ids")]
	NumericAlias { alias: String },
}

/// Where a variable landed after splitting its name.
enum Stratum {
	Global,
	Pool { pool: String },
	Instance { pool: String, id: u32 },
}

/// Launcher keys, longest first so suffix matching is unambiguous.
const LAUNCHER_KEYS: &[&str] = &[
	"IGNORE_HTTPS_ERRORS",
	"TIMEOUT_NAVIGATION",
	"BLOCKED_ORIGINS",
	"ALLOWED_ORIGINS",
	"EXTENSION_TOKEN",
	"IMAGE_RESPONSES",
	"ENABLE_STEALTH",
	"TIMEOUT_ACTION",
	"STORAGE_STATE",
	"USER_DATA_DIR",
	"VIEWPORT_SIZE",
	"PROXY_SERVER",
	"SAVE_SESSION",
	"INIT_SCRIPT",
	"NO_SANDBOX",
	"OUTPUT_DIR",
	"SAVE_TRACE",
	"SAVE_VIDEO",
	"USER_AGENT",
	"EXTENSION",
	"HEADLESS",
	"ISOLATED",
	"BROWSER",
	"DEVICE",
	"CAPS",
];

/// Structural keys, also matched as suffixes.
const STRUCTURAL_KEYS: &[&str] = &["DESCRIPTION", "IS_DEFAULT", "INSTANCES", "ALIAS"];

/// Global-only operational keys.
const GLOBAL_KEYS: &[&str] = &[
	"BLOB_CLEANUP_INTERVAL_MINUTES",
	"HEALTH_CHECK_INTERVAL_MS",
	"HEALTH_FAILURE_THRESHOLD",
	"BLOB_SIZE_THRESHOLD_KB",
	"LEASE_WAIT_CEILING_MS",
	"SNAPSHOT_TTL_MINUTES",
	"STARTUP_TIMEOUT_MS",
	"BLOB_STORAGE_ROOT",
	"SHUTDOWN_GRACE_MS",
	"PROBE_TIMEOUT_MS",
	"BLOB_MAX_SIZE_MB",
	"CALL_TIMEOUT_MS",
	"BLOB_TTL_HOURS",
];

impl ConfigTree {
	/// Load and validate the tree from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_vars(std::env::vars())
	}

	/// Load and validate the tree from an explicit variable list.
	pub fn from_vars(
		vars: impl IntoIterator<Item = (String, String)>,
	) -> Result<Self, ConfigError> {
		let mut tree = ConfigTree {
			global: LauncherSettings::default(),
			proxy: ProxySettings::default(),
			blob: BlobSettings::default(),
			pools: BTreeMap::new(),
		};

		let mut sorted: Vec<(String, String)> = vars
			.into_iter()
			.filter(|(name, _)| name.starts_with(ENV_PREFIX))
			.collect();
		sorted.sort();

		for (name, value) in sorted {
			tree.apply_var(&name, &value)?;
		}

		tree.validate()?;
		Ok(tree)
	}

	/// The single pool with `is_default=true`.
	///
	/// Only meaningful after [`ConfigTree::validate`] has passed.
	#[must_use]
	pub fn default_pool(&self) -> Option<&PoolConfig> {
		self.pools.values().find(|p| p.is_default)
	}

	fn apply_var(&mut self, var: &str, value: &str) -> Result<(), ConfigError> {
		let rest = &var[ENV_PREFIX.len()..];

		let (stratum, key) = if let Some(scoped) = rest.strip_prefix('_') {
			split_scoped(var, scoped)?
		} else {
			(Stratum::Global, rest.to_string())
		};

		match stratum {
			Stratum::Global => self.apply_global(var, &key, value),
			Stratum::Pool { pool } => self.apply_pool(var, &pool, &key, value),
			Stratum::Instance { pool, id } => self.apply_instance(var, &pool, id, &key, value),
		}
	}

	fn apply_global(&mut self, var: &str, key: &str, value: &str) -> Result<(), ConfigError> {
		match key {
			"INSTANCES" | "IS_DEFAULT" | "DESCRIPTION" => {
				return Err(ConfigError::StratumViolation {
					var: var.to_string(),
					key: structural_key_name(key),
					allowed: "pool",
				});
			}
			"ALIAS" => {
				return Err(ConfigError::StratumViolation {
					var: var.to_string(),
					key: "ALIAS",
					allowed: "instance",
				});
			}
			"BLOB_STORAGE_ROOT" => {
				self.blob.storage_root = Some(PathBuf::from(value));
				return Ok(());
			}
			"BLOB_MAX_SIZE_MB" => {
				self.blob.max_bytes = parse_u64(var, value)? * 1024 * 1024;
				return Ok(());
			}
			"BLOB_SIZE_THRESHOLD_KB" => {
				self.blob.inline_threshold = usize::try_from(parse_u64(var, value)? * 1024)
					.map_err(|_| ConfigError::InvalidValue {
						var: var.to_string(),
						expected: "a smaller size",
					})?;
				return Ok(());
			}
			"BLOB_TTL_HOURS" => {
				self.blob.ttl = Duration::from_secs(parse_u64(var, value)? * 60 * 60);
				return Ok(());
			}
			"BLOB_CLEANUP_INTERVAL_MINUTES" => {
				self.blob.sweep_interval = Duration::from_secs(parse_u64(var, value)? * 60);
				return Ok(());
			}
			"STARTUP_TIMEOUT_MS" => {
				self.proxy.startup_timeout = Duration::from_millis(parse_u64(var, value)?);
				return Ok(());
			}
			"CALL_TIMEOUT_MS" => {
				self.proxy.call_timeout = Duration::from_millis(parse_u64(var, value)?);
				return Ok(());
			}
			"PROBE_TIMEOUT_MS" => {
				self.proxy.probe_timeout = Duration::from_millis(parse_u64(var, value)?);
				return Ok(());
			}
			"HEALTH_CHECK_INTERVAL_MS" => {
				self.proxy.health_check_interval = Duration::from_millis(parse_u64(var, value)?);
				return Ok(());
			}
			"HEALTH_FAILURE_THRESHOLD" => {
				self.proxy.health_failure_threshold =
					u32::try_from(parse_u64(var, value)?).map_err(|_| ConfigError::InvalidValue {
						var: var.to_string(),
						expected: "a 32-bit count",
					})?;
				return Ok(());
			}
			"SHUTDOWN_GRACE_MS" => {
				self.proxy.shutdown_grace = Duration::from_millis(parse_u64(var, value)?);
				return Ok(());
			}
			"LEASE_WAIT_CEILING_MS" => {
				self.proxy.lease_wait_ceiling = Some(Duration::from_millis(parse_u64(var, value)?));
				return Ok(());
			}
			"SNAPSHOT_TTL_MINUTES" => {
				self.proxy.snapshot_ttl = Duration::from_secs(parse_u64(var, value)? * 60);
				return Ok(());
			}
			_ => {}
		}

		apply_launcher_key(&mut self.global, var, key, value)
	}

	fn apply_pool(
		&mut self,
		var: &str,
		pool: &str,
		key: &str,
		value: &str,
	) -> Result<(), ConfigError> {
		if GLOBAL_KEYS.contains(&key) {
			return Err(ConfigError::StratumViolation {
				var: var.to_string(),
				key: "operational and blob-store keys",
				allowed: "global",
			});
		}

		let entry = self
			.pools
			.entry(pool.to_string())
			.or_insert_with(|| PoolConfig::new(pool.to_string()));

		match key {
			"INSTANCES" => {
				entry.instances = u32::try_from(parse_u64(var, value)?).map_err(|_| {
					ConfigError::InvalidValue {
						var: var.to_string(),
						expected: "a 32-bit count",
					}
				})?;
				Ok(())
			}
			"IS_DEFAULT" => {
				entry.is_default = parse_bool(var, value)?;
				Ok(())
			}
			"DESCRIPTION" => {
				entry.description = Some(value.to_string());
				Ok(())
			}
			"ALIAS" => Err(ConfigError::StratumViolation {
				var: var.to_string(),
				key: "ALIAS",
				allowed: "instance",
			}),
			_ => apply_launcher_key(&mut entry.settings, var, key, value),
		}
	}

	fn apply_instance(
		&mut self,
		var: &str,
		pool: &str,
		id: u32,
		key: &str,
		value: &str,
	) -> Result<(), ConfigError> {
		if GLOBAL_KEYS.contains(&key) {
			return Err(ConfigError::StratumViolation {
				var: var.to_string(),
				key: "operational and blob-store keys",
				allowed: "global",
			});
		}

		let entry = self
			.pools
			.entry(pool.to_string())
			.or_insert_with(|| PoolConfig::new(pool.to_string()));
		let instance = entry.overrides.entry(id).or_default();

		match key {
			"ALIAS" => {
				instance.alias = Some(value.to_string());
				Ok(())
			}
			"INSTANCES" | "IS_DEFAULT" | "DESCRIPTION" => Err(ConfigError::StratumViolation {
				var: var.to_string(),
				key: structural_key_name(key),
				allowed: "pool",
			}),
			_ => apply_launcher_key(&mut instance.settings, var, key, value),
		}
	}

	/// Startup validation. Any failure is fatal.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.pools.is_empty() {
			return Err(ConfigError::NoPools);
		}

		let defaults: Vec<String> = self
			.pools
			.values()
			.filter(|p| p.is_default)
			.map(|p| p.name.clone())
			.collect();
		match defaults.len() {
			0 => return Err(ConfigError::NoDefaultPool),
			1 => {}
			_ => return Err(ConfigError::MultipleDefaultPools { pools: defaults }),
		}

		for pool in self.pools.values() {
			if pool.instances == 0 {
				return Err(ConfigError::MissingInstances {
					pool: pool.name.clone(),
				});
			}

			let mut seen = std::collections::HashSet::new();
			for (&id, instance) in &pool.overrides {
				if id >= pool.instances {
					return Err(ConfigError::OverrideOutOfRange {
						pool: pool.name.clone(),
						id,
						instances: pool.instances,
					});
				}
				if let Some(alias) = &instance.alias {
					if alias.chars().all(|c| c.is_ascii_digit()) {
						return Err(ConfigError::NumericAlias {
							alias: alias.clone(),
						});
					}
					if !seen.insert(alias.clone()) {
						return Err(ConfigError::DuplicateAlias {
							pool: pool.name.clone(),
							alias: alias.clone(),
						});
					}
				}
			}
		}

		Ok(())
	}
}

fn structural_key_name(key: &str) -> &'static str {
	match key {
		"INSTANCES" => "INSTANCES",
		"IS_DEFAULT" => "IS_DEFAULT",
		"DESCRIPTION" => "DESCRIPTION",
		_ => "ALIAS",
	}
}

/// Split a pool- or instance-scoped variable tail into stratum and key.
///
/// `scoped` is the text after `PW_MCP_PROXY__`. The key is found by suffix
/// match against the known key sets (longest first); the remaining head is
/// either `<POOL>` or `<POOL>__<ID>`.
fn split_scoped(var: &str, scoped: &str) -> Result<(Stratum, String), ConfigError> {
	let key = LAUNCHER_KEYS
		.iter()
		.chain(STRUCTURAL_KEYS.iter())
		.chain(GLOBAL_KEYS.iter())
		.find(|key| {
			scoped
				.strip_suffix(*key)
				.is_some_and(|head| head.ends_with('_') && head.len() > 1)
		})
		.copied()
		.ok_or_else(|| ConfigError::UnknownKey {
			var: var.to_string(),
		})?;

	let head = &scoped[..scoped.len() - key.len() - 1];

	if let Some((pool, id)) = head.rsplit_once("__")
		&& !id.is_empty()
		&& id.chars().all(|c| c.is_ascii_digit())
	{
		let id = id.parse().map_err(|_| ConfigError::InvalidValue {
			var: var.to_string(),
			expected: "a 32-bit instance id",
		})?;
		if pool.is_empty() {
			return Err(ConfigError::BadFormat {
				var: var.to_string(),
			});
		}
		return Ok((
			Stratum::Instance {
				pool: pool.to_ascii_lowercase(),
				id,
			},
			key.to_string(),
		));
	}

	if head.is_empty() {
		return Err(ConfigError::BadFormat {
			var: var.to_string(),
		});
	}

	Ok((
		Stratum::Pool {
			pool: head.to_ascii_lowercase(),
		},
		key.to_string(),
	))
}

fn apply_launcher_key(
	settings: &mut LauncherSettings,
	var: &str,
	key: &str,
	value: &str,
) -> Result<(), ConfigError> {
	match key {
		"BROWSER" => settings.browser = Some(value.to_string()),
		"HEADLESS" => settings.headless = Some(parse_bool(var, value)?),
		"NO_SANDBOX" => settings.no_sandbox = Some(parse_bool(var, value)?),
		"DEVICE" => settings.device = Some(value.to_string()),
		"VIEWPORT_SIZE" => settings.viewport_size = Some(value.to_string()),
		"ISOLATED" => settings.isolated = Some(parse_bool(var, value)?),
		"USER_DATA_DIR" => settings.user_data_dir = Some(value.to_string()),
		"STORAGE_STATE" => settings.storage_state = Some(value.to_string()),
		"ALLOWED_ORIGINS" => settings.allowed_origins = Some(value.to_string()),
		"BLOCKED_ORIGINS" => settings.blocked_origins = Some(value.to_string()),
		"PROXY_SERVER" => settings.proxy_server = Some(value.to_string()),
		"CAPS" => settings.caps = Some(value.to_string()),
		"SAVE_SESSION" => settings.save_session = Some(parse_bool(var, value)?),
		"SAVE_TRACE" => settings.save_trace = Some(parse_bool(var, value)?),
		"SAVE_VIDEO" => settings.save_video = Some(value.to_string()),
		"OUTPUT_DIR" => settings.output_dir = Some(value.to_string()),
		"TIMEOUT_ACTION" => settings.timeout_action = Some(parse_u64(var, value)?),
		"TIMEOUT_NAVIGATION" => settings.timeout_navigation = Some(parse_u64(var, value)?),
		"IMAGE_RESPONSES" => settings.image_responses = Some(value.to_string()),
		"USER_AGENT" => settings.user_agent = Some(value.to_string()),
		"INIT_SCRIPT" => settings.init_script = Some(value.to_string()),
		"IGNORE_HTTPS_ERRORS" => settings.ignore_https_errors = Some(parse_bool(var, value)?),
		"EXTENSION" => settings.extension = Some(parse_bool(var, value)?),
		"EXTENSION_TOKEN" => settings.extension_token = Some(value.to_string()),
		"ENABLE_STEALTH" => settings.enable_stealth = Some(parse_bool(var, value)?),
		_ => {
			return Err(ConfigError::UnknownKey {
				var: var.to_string(),
			});
		}
	}
	Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
	match value.to_ascii_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::InvalidValue {
			var: var.to_string(),
			expected: "a boolean (true/false)",
		}),
	}
}

fn parse_u64(var: &str, value: &str) -> Result<u64, ConfigError> {
	value.parse().map_err(|_| ConfigError::InvalidValue {
		var: var.to_string(),
		expected: "an unsigned integer",
	})
}
