//! Plugin launching configured from [`Config`].

use drover_config::Config;
use drover_plugins::{PluginLauncher, PluginPool};

/// Builds a launcher using the configured prefix, search directory, and
/// handshake timeout.
#[must_use]
pub fn launcher(config: &Config) -> PluginLauncher {
    let mut launcher = PluginLauncher::new()
        .with_prefix(config.plugin_prefix())
        .with_handshake_timeout(config.handshake_timeout());
    if let Some(dir) = config.plugin_dir() {
        launcher = launcher.with_search_dir(dir.as_std_path());
    }
    launcher
}

/// Builds a plugin pool whose bridges use [`launcher`].
#[must_use]
pub fn plugin_pool(config: &Config) -> PluginPool {
    PluginPool::new(launcher(config))
}
