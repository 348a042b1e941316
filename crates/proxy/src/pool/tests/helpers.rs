//! Shared pool test construction helpers.

use std::collections::BTreeMap;
use std::sync::Arc;

use pwmcp_proxy_proto::config::{
	InstanceConfig, LauncherSettings, PoolConfig, ProxySettings,
};

use crate::child::ChildLauncher;
use crate::pool::Pool;

pub fn pool_config(name: &str, instances: u32) -> PoolConfig {
	PoolConfig {
		name: name.to_string(),
		description: None,
		is_default: true,
		instances,
		settings: LauncherSettings::default(),
		overrides: BTreeMap::new(),
	}
}

pub fn pool_config_with_aliases(name: &str, instances: u32, aliases: &[(u32, &str)]) -> PoolConfig {
	let mut config = pool_config(name, instances);
	for (id, alias) in aliases {
		config.overrides.insert(
			*id,
			InstanceConfig {
				alias: Some((*alias).to_string()),
				settings: LauncherSettings::default(),
			},
		);
	}
	config
}

pub async fn make_pool(instances: u32, launcher: Arc<dyn ChildLauncher>) -> Arc<Pool> {
	make_pool_with(
		pool_config("default", instances),
		ProxySettings::default(),
		launcher,
	)
	.await
}

pub async fn make_pool_with(
	config: PoolConfig,
	proxy: ProxySettings,
	launcher: Arc<dyn ChildLauncher>,
) -> Arc<Pool> {
	Arc::new(Pool::init(&config, &LauncherSettings::default(), &proxy, &launcher, "").await)
}
