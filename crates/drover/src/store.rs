//! Collaborator interfaces consumed by host flows.
//!
//! Persistence and authentication setup live outside this crate. Host flows
//! reach them only through these traits.

use crate::error::{HostError, StoreError};
use crate::host::Host;

/// Persistence for host records, keyed by host name.
pub trait HostStore {
    /// Root directory handed to new backends as their store path.
    fn store_path(&self) -> String;

    /// Loads an unloaded host record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or a backend failure.
    fn load(&self, name: &str) -> Result<Host, StoreError>;

    /// Persists a host record, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns a backend failure.
    fn save(&self, host: &Host) -> Result<(), StoreError>;

    /// Names of every stored host.
    ///
    /// # Errors
    ///
    /// Returns a backend failure.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Returns `true` if a host is stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns a backend failure.
    fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Deletes a host record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or a backend failure.
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// Generates and installs authentication material for a host.
pub trait AuthConfigurer: Send + Sync {
    /// Configures authentication on a loaded host.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Auth`] or a driver failure.
    fn configure_auth(&self, host: &mut Host) -> Result<(), HostError>;
}
