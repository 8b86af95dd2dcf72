//! Errors raised by host-level flows.

use drover_plugins::DriverError;
use thiserror::Error;

/// Failures reported by a [`HostStore`](crate::HostStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No host is stored under the name.
    #[error("host '{name}' does not exist")]
    NotFound {
        /// Requested host name.
        name: String,
    },

    /// A host with the name is already stored.
    #[error("host '{name}' already exists")]
    AlreadyExists {
        /// Conflicting host name.
        name: String,
    },

    /// The persistence backend failed.
    #[error("host store failure: {message}")]
    Backend {
        /// Backend-supplied description.
        message: String,
    },
}

/// Failures of one host-level operation.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// The host record was used before a driver was attached.
    #[error("host '{name}' has no loaded driver")]
    NotLoaded {
        /// Host name.
        name: String,
    },

    /// The host's driver reported a failure.
    #[error("host '{host}': {source}")]
    Driver {
        /// Host name.
        host: String,
        /// Failure raised by the driver or its bridge.
        #[source]
        source: DriverError,
    },

    /// The host store reported a failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Authentication material could not be configured.
    #[error("configuring authentication for host '{host}' failed: {message}")]
    Auth {
        /// Host name.
        host: String,
        /// Description of the failure.
        message: String,
    },

    /// The host name is not usable.
    #[error("invalid host name '{name}': use letters, digits, '-' and '.', starting with a letter or digit")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// The action panicked before producing an outcome.
    #[error("action on host '{host}' panicked: {message}")]
    Panicked {
        /// Host name.
        host: String,
        /// Panic payload text.
        message: String,
    },
}

impl HostError {
    pub(crate) fn driver(host: &str, source: DriverError) -> Self {
        Self::Driver {
            host: host.to_owned(),
            source,
        }
    }
}
