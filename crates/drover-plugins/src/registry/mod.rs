//! Registry of in-process driver constructors.
//!
//! Plugin executables use a [`DriverRegistry`] to pick the backend they
//! serve from their own executable name. Several backends can share one
//! binary this way. Duplicate registrations are rejected.

use std::collections::BTreeMap;

use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};

/// Constructs a fresh, unconfigured driver.
pub type DriverFactory = fn() -> Box<dyn Driver>;

/// Driver constructors keyed by driver name.
///
/// # Example
///
/// ```
/// use drover_plugins::DriverRegistry;
///
/// let registry = DriverRegistry::new();
/// assert!(registry.is_empty());
/// assert!(registry.create("fake").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyRegistered`] if `name` is taken.
    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) -> DriverResult<()> {
        let key: String = name.into();
        if self.factories.contains_key(&key) {
            return Err(DriverError::AlreadyRegistered { name: key });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Constructs an unconfigured driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownDriver`] if `name` is not registered.
    pub fn create(&self, name: &str) -> DriverResult<Box<dyn Driver>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| DriverError::UnknownDriver {
                name: name.to_owned(),
            })
    }

    /// Constructs a driver and loads `raw` into it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownDriver`] or the driver's own
    /// configuration error.
    pub fn instantiate(&self, name: &str, raw: &[u8]) -> DriverResult<Box<dyn Driver>> {
        let mut driver = self.create(name)?;
        driver.set_config_raw(raw)?;
        Ok(driver)
    }

    /// Constructs the driver an executable named `executable` serves.
    ///
    /// `prefix` is stripped from the name when present.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownDriver`] if the remaining name is not
    /// registered.
    pub fn for_executable(&self, executable: &str, prefix: &str) -> DriverResult<Box<dyn Driver>> {
        let name = executable.strip_prefix(prefix).unwrap_or(executable);
        self.create(name)
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
