//! Shared configuration for the drover host process.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then a
//! configuration file, then `DROVER_*` environment variables, then command
//! line flags. The plugin launcher reads the prefix, search directory, and
//! handshake timeout from here; telemetry reads the log settings.

mod defaults;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_PLUGIN_PREFIX,
    default_handshake_timeout, default_handshake_timeout_ms, default_log_filter,
    default_log_filter_string, default_log_format, default_plugin_prefix,
};
pub use self::logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for drover.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DROVER")]
pub struct Config {
    /// `tracing` filter expression, e.g. `info` or `drover_plugins=debug`.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log records.
    #[serde(default)]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Prefix prepended to a driver name to form its plugin executable name.
    #[serde(default = "default_plugin_prefix")]
    #[ortho_config(default = default_plugin_prefix())]
    pub plugin_prefix: String,
    /// Directory searched for plugin executables before `PATH`.
    #[serde(default)]
    pub plugin_dir: Option<Utf8PathBuf>,
    /// Upper bound on the wait for a plugin's address announcement.
    #[serde(default = "default_handshake_timeout_ms")]
    #[ortho_config(default = default_handshake_timeout_ms())]
    pub handshake_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            plugin_prefix: default_plugin_prefix(),
            plugin_dir: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Config {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Plugin executable prefix.
    #[must_use]
    pub fn plugin_prefix(&self) -> &str {
        self.plugin_prefix.as_str()
    }

    /// Optional directory searched before `PATH`.
    #[must_use]
    pub fn plugin_dir(&self) -> Option<&Utf8Path> {
        self.plugin_dir.as_deref()
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
