//! The persisted record of one managed machine.

use std::fmt;

use drover_plugins::{Driver, DriverResult};

use crate::error::HostError;

/// A machine known to the host store.
///
/// The raw configuration document is the backend's complete state. A live
/// driver is attached while the host is loaded for an operation; its state
/// is copied back into the record by [`Host::refresh_config`] before the
/// record is saved.
pub struct Host {
    name: String,
    driver_name: String,
    raw_config: Vec<u8>,
    driver: Option<Box<dyn Driver>>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("driver_name", &self.driver_name)
            .field("raw_config", &String::from_utf8_lossy(&self.raw_config))
            .field("loaded", &self.driver.is_some())
            .finish()
    }
}

impl Host {
    /// Creates an unloaded host record.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        driver_name: impl Into<String>,
        raw_config: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            raw_config: raw_config.into(),
            driver: None,
        }
    }

    /// Host name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Name of the backend managing this host.
    #[must_use]
    pub const fn driver_name(&self) -> &str {
        self.driver_name.as_str()
    }

    /// Backend state document as last saved or refreshed.
    #[must_use]
    pub fn raw_config(&self) -> &[u8] {
        &self.raw_config
    }

    /// Returns `true` while a driver is attached.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.driver.is_some()
    }

    /// Attaches a live driver.
    pub fn attach(&mut self, driver: Box<dyn Driver>) {
        self.driver = Some(driver);
    }

    /// Detaches and returns the live driver.
    pub fn detach(&mut self) -> Option<Box<dyn Driver>> {
        self.driver.take()
    }

    /// Runs `op` against the attached driver.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotLoaded`] when no driver is attached, or
    /// [`HostError::Driver`] wrapping the driver's failure.
    pub fn with_driver<T>(
        &mut self,
        op: impl FnOnce(&mut dyn Driver) -> DriverResult<T>,
    ) -> Result<T, HostError> {
        let Some(driver) = self.driver.as_deref_mut() else {
            return Err(HostError::NotLoaded {
                name: self.name.clone(),
            });
        };
        op(driver).map_err(|source| HostError::driver(&self.name, source))
    }

    /// Copies the driver's current state into the record.
    ///
    /// # Errors
    ///
    /// Fails like [`Host::with_driver`].
    pub fn refresh_config(&mut self) -> Result<(), HostError> {
        let raw = self.with_driver(|driver| driver.config_raw())?;
        self.raw_config = raw;
        Ok(())
    }
}
