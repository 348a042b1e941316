//! Registry of all pools: builds the fleet from the frozen configuration and
//! routes `(pool, instance)` selections.
//!
//! Ownership is strictly downward: the registry owns the pools, each pool
//! owns its children, each child owns its OS process. The registry is
//! immutable after startup; configuration validation failures are fatal.

use std::collections::HashMap;
use std::sync::Arc;

use pwmcp_proxy_proto::config::{ConfigError, ConfigTree};
use pwmcp_proxy_proto::types::PoolStatus;
use thiserror::Error;

use crate::child::{ChildLauncher, command};
use crate::pool::{LeaseHint, LeaseKey, Pool};

/// Errors building the fleet at startup. All fatal.
#[derive(Debug, Error)]
pub enum BuildError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("failed to materialize the stealth init script: {0}")]
	StealthScript(#[source] std::io::Error),
}

/// Errors resolving a `(pool, instance)` selection.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("unknown pool {0:?}")]
	UnknownPool(String),

	#[error("no instance with alias {0:?} in any pool")]
	UnknownAlias(String),

	#[error("alias {alias:?} exists in multiple pools: {pools:?}; name the pool explicitly")]
	AmbiguousAlias { alias: String, pools: Vec<String> },
}

/// Owns all pools. Immutable after startup.
pub struct PoolRegistry {
	pools: HashMap<String, Arc<Pool>>,
	default_pool: String,
}

impl std::fmt::Debug for PoolRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PoolRegistry")
			.field("pools", &self.pools.keys().collect::<Vec<_>>())
			.field("default_pool", &self.default_pool)
			.finish()
	}
}

impl PoolRegistry {
	/// Validate the configuration and build the fleet.
	///
	/// Each pool spawns its children eagerly; a health loop is started per
	/// pool before the registry is returned.
	pub async fn build(
		tree: &ConfigTree,
		launcher: Arc<dyn ChildLauncher>,
	) -> Result<PoolRegistry, BuildError> {
		tree.validate()?;

		let needs_stealth = stealth_requested(tree);
		let stealth_script = if needs_stealth {
			command::ensure_stealth_script()
				.map_err(BuildError::StealthScript)?
				.display()
				.to_string()
		} else {
			String::new()
		};

		let mut pools = HashMap::new();
		for config in tree.pools.values() {
			let pool = Arc::new(
				Pool::init(config, &tree.global, &tree.proxy, &launcher, &stealth_script).await,
			);
			pool.spawn_health_loop();
			pools.insert(config.name.clone(), pool);
		}

		let default_pool = tree
			.default_pool()
			.map(|p| p.name.clone())
			.ok_or(ConfigError::NoDefaultPool)?;

		Ok(PoolRegistry {
			pools,
			default_pool,
		})
	}

	/// The default pool.
	#[must_use]
	pub fn default_pool(&self) -> &Arc<Pool> {
		&self.pools[&self.default_pool]
	}

	/// Resolve a `(pool, instance)` selection to a pool and lease hint.
	///
	/// With no pool named, an alias is looked up across all pools and must
	/// be unique among them; a numeric instance selects within the default
	/// pool.
	pub fn resolve(
		&self,
		pool: Option<&str>,
		instance: Option<&str>,
	) -> Result<(Arc<Pool>, LeaseHint), ResolveError> {
		if let Some(name) = pool {
			let pool = self
				.pools
				.get(name)
				.ok_or_else(|| ResolveError::UnknownPool(name.to_string()))?;
			let hint = match instance {
				Some(key) => LeaseHint::Specific(LeaseKey::parse(key)),
				None => LeaseHint::Any,
			};
			return Ok((pool.clone(), hint));
		}

		let Some(instance) = instance else {
			return Ok((self.default_pool().clone(), LeaseHint::Any));
		};

		match LeaseKey::parse(instance) {
			key @ LeaseKey::Id(_) => Ok((self.default_pool().clone(), LeaseHint::Specific(key))),
			LeaseKey::Alias(alias) => {
				let mut owners: Vec<&Arc<Pool>> = self
					.pools
					.values()
					.filter(|pool| pool.has_alias(&alias))
					.collect();
				owners.sort_by(|a, b| a.name().cmp(b.name()));
				match owners.as_slice() {
					[] => Err(ResolveError::UnknownAlias(alias)),
					[pool] => Ok((
						(*pool).clone(),
						LeaseHint::Specific(LeaseKey::Alias(alias)),
					)),
					many => Err(ResolveError::AmbiguousAlias {
						alias,
						pools: many.iter().map(|p| p.name().to_string()).collect(),
					}),
				}
			}
		}
	}

	/// Status of one pool, or of every pool when no name is given.
	pub fn status(&self, pool: Option<&str>) -> Result<Vec<PoolStatus>, ResolveError> {
		match pool {
			Some(name) => {
				let pool = self
					.pools
					.get(name)
					.ok_or_else(|| ResolveError::UnknownPool(name.to_string()))?;
				Ok(vec![pool.status()])
			}
			None => {
				let mut all: Vec<PoolStatus> = self.pools.values().map(|p| p.status()).collect();
				all.sort_by(|a, b| a.name.cmp(&b.name));
				Ok(all)
			}
		}
	}

	/// Shut down every pool in parallel.
	pub async fn shutdown(&self) {
		let mut stops = tokio::task::JoinSet::new();
		for pool in self.pools.values() {
			let pool = pool.clone();
			stops.spawn(async move { pool.shutdown().await });
		}
		while stops.join_next().await.is_some() {}
	}
}

/// Whether any stratum of the tree enables stealth.
fn stealth_requested(tree: &ConfigTree) -> bool {
	tree.global.enable_stealth == Some(true)
		|| tree.pools.values().any(|pool| {
			pool.settings.enable_stealth == Some(true)
				|| pool
					.overrides
					.values()
					.any(|inst| inst.settings.enable_stealth == Some(true))
		})
}
