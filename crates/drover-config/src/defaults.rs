use std::time::Duration;

use crate::logging::LogFormat;

/// Default log filter expression used by the host process.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Executable name prefix shared by every driver plugin.
pub const DEFAULT_PLUGIN_PREFIX: &str = "drover-driver-";

/// How long a plugin may take to announce its address.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default log filter expression used by the host process.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned plugin prefix used by serde defaults.
pub fn default_plugin_prefix() -> String {
    DEFAULT_PLUGIN_PREFIX.to_owned()
}

/// Handshake timeout in milliseconds used by serde defaults.
pub const fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

/// Handshake timeout as a [`Duration`].
pub const fn default_handshake_timeout() -> Duration {
    Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)
}
