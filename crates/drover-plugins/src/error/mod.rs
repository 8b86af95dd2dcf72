//! Errors raised across the driver plugin boundary.
//!
//! A single [`DriverError`] covers launcher, transport, and backend failures
//! so a [`Driver`](crate::Driver) implementation looks the same whether it
//! runs in-process or behind a bridge. I/O errors are wrapped in `Arc` so the
//! error stays `Clone`; the launcher caches a failed handshake and hands the
//! same error to every later caller.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::flags::FlagKind;

/// Result alias used by every driver operation.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors arising from driver operations and plugin plumbing.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// No plugin executable exists for the driver.
    #[error("plugin executable '{executable}' for driver '{name}' not found")]
    NotFound {
        /// Driver name that was looked up.
        name: String,
        /// Executable name derived from the driver name.
        executable: String,
    },

    /// The plugin process could not be started.
    #[error("plugin for driver '{name}' failed to start: {source}")]
    SpawnFailed {
        /// Driver name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The plugin did not announce its address in time.
    #[error("plugin for driver '{name}' did not announce an address within {timeout_ms}ms")]
    HandshakeTimeout {
        /// Driver name.
        name: String,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The plugin's address announcement was missing or malformed.
    #[error("plugin for driver '{name}' failed the address handshake: {message}")]
    Handshake {
        /// Driver name.
        name: String,
        /// Description of the violation.
        message: String,
    },

    /// An I/O error occurred on the plugin connection.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A message did not conform to the wire protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The plugin answered a call with an error.
    #[error("remote call '{method}' failed: {message}")]
    Remote {
        /// Qualified method name.
        method: String,
        /// Error text reported by the plugin.
        message: String,
    },

    /// A concrete backend rejected the operation.
    #[error("{message}")]
    Backend {
        /// Backend-supplied description.
        message: String,
    },

    /// A flag was read with the wrong accessor.
    #[error("flag '{name}' holds a {actual} value, not {expected}")]
    FlagType {
        /// Flag name.
        name: String,
        /// Kind the caller asked for.
        expected: FlagKind,
        /// Kind actually stored.
        actual: FlagKind,
    },

    /// A flag was read but never set.
    #[error("flag '{name}' was not provided")]
    MissingFlag {
        /// Flag name.
        name: String,
    },

    /// No driver is registered under the name.
    #[error("driver '{name}' is not registered")]
    UnknownDriver {
        /// Driver name that was looked up.
        name: String,
    },

    /// A driver with the same name was registered twice.
    #[error("driver '{name}' is already registered")]
    AlreadyRegistered {
        /// Driver name.
        name: String,
    },

    /// The plugin speaks a different protocol version.
    #[error("plugin speaks protocol version {remote}, expected {local}")]
    VersionMismatch {
        /// Version compiled into this process.
        local: u32,
        /// Version reported by the plugin.
        remote: u32,
    },

    /// The bridge was closed; no further calls are serviced.
    #[error("driver connection is closed")]
    Closed,
}

impl DriverError {
    /// Builds a [`DriverError::Backend`] from backend-supplied text.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Builds a [`DriverError::Protocol`].
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(error: serde_json::Error) -> Self {
        Self::protocol(error.to_string())
    }
}
