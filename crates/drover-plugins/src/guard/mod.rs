//! Mutual exclusion for backends that cannot tolerate concurrent use.
//!
//! [`Synchronized`] wraps any [`Driver`] and holds a lock for the duration
//! of every operation. Wrappers built on the same lock exclude each other,
//! so one lock per backend family keeps every instance of that family
//! strictly serial across hosts. [`FamilyLocks`] hands out those shared
//! locks by family name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::driver::{Driver, MachineState};
use crate::error::DriverResult;
use crate::flags::{DriverOptions, FlagDescriptor};

static GLOBAL_FAMILY_LOCK: Lazy<Arc<Mutex<()>>> = Lazy::new(|| Arc::new(Mutex::new(())));

/// A driver whose operations all run under one lock.
#[derive(Debug)]
pub struct Synchronized<D> {
    driver: D,
    lock: Arc<Mutex<()>>,
}

impl<D: Driver> Synchronized<D> {
    /// Wraps `driver` with a lock of its own.
    #[must_use]
    pub fn private(driver: D) -> Self {
        Self::on_lock(driver, Arc::new(Mutex::new(())))
    }

    /// Wraps `driver` with a caller-provided, possibly shared, lock.
    #[must_use]
    pub const fn on_lock(driver: D, lock: Arc<Mutex<()>>) -> Self {
        Self { driver, lock }
    }

    /// Wraps `driver` with the process-wide family lock.
    #[must_use]
    pub fn global(driver: D) -> Self {
        Self::on_lock(driver, Arc::clone(&GLOBAL_FAMILY_LOCK))
    }

    /// Returns `true` if both wrappers exclude each other.
    #[must_use]
    pub fn shares_lock_with<E>(&self, other: &Synchronized<E>) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }

    /// Unwraps the inner driver.
    #[must_use]
    pub fn into_inner(self) -> D {
        self.driver
    }

    fn hold(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<T>(&self, op: impl FnOnce(&D) -> T) -> T {
        let _held = self.hold();
        op(&self.driver)
    }

    fn with_mut<T>(&mut self, op: impl FnOnce(&mut D) -> T) -> T {
        let _held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut self.driver)
    }
}

impl<D: Driver> Driver for Synchronized<D> {
    fn driver_name(&self) -> DriverResult<String> {
        self.with(Driver::driver_name)
    }

    fn machine_name(&self) -> DriverResult<String> {
        self.with(Driver::machine_name)
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        self.with(Driver::create_flags)
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        self.with_mut(|driver| driver.set_config_from_flags(options))
    }

    fn config_raw(&self) -> DriverResult<Vec<u8>> {
        self.with(Driver::config_raw)
    }

    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()> {
        self.with_mut(|driver| driver.set_config_raw(data))
    }

    fn state(&self) -> DriverResult<MachineState> {
        self.with(Driver::state)
    }

    fn url(&self) -> DriverResult<String> {
        self.with(Driver::url)
    }

    fn ip(&self) -> DriverResult<String> {
        self.with(Driver::ip)
    }

    fn ssh_hostname(&self) -> DriverResult<String> {
        self.with(Driver::ssh_hostname)
    }

    fn ssh_port(&self) -> DriverResult<u16> {
        self.with(Driver::ssh_port)
    }

    fn ssh_username(&self) -> DriverResult<String> {
        self.with(Driver::ssh_username)
    }

    fn ssh_key_path(&self) -> DriverResult<String> {
        self.with(Driver::ssh_key_path)
    }

    fn local_artifact_path(&self, file: &str) -> DriverResult<String> {
        self.with(|driver| driver.local_artifact_path(file))
    }

    fn global_artifact_path(&self) -> DriverResult<String> {
        self.with(Driver::global_artifact_path)
    }

    fn pre_create_check(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::pre_create_check)
    }

    fn create(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::create)
    }

    fn remove(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::remove)
    }

    fn start(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::start)
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::stop)
    }

    fn restart(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::restart)
    }

    fn kill(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::kill)
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        self.with_mut(Driver::upgrade)
    }
}

/// One shared lock per backend family.
///
/// # Example
///
/// ```
/// use drover_plugins::guard::FamilyLocks;
///
/// let locks = FamilyLocks::new();
/// let first = locks.lock_for("virtualbox");
/// let second = locks.lock_for("virtualbox");
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug, Default)]
pub struct FamilyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FamilyLocks {
    /// Creates an empty set of family locks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock shared by every driver of `family`.
    #[must_use]
    pub fn lock_for(&self, family: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(family.to_owned()).or_default())
    }

    /// Wraps `driver` with the lock of `family`.
    #[must_use]
    pub fn wrap<D: Driver>(&self, family: &str, driver: D) -> Synchronized<D> {
        Synchronized::on_lock(driver, self.lock_for(family))
    }
}
