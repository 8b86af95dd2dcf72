//! Host flows that load drivers, act on them, and persist the result.
//!
//! A [`Session`] borrows the host store and a [`DriverSource`] for the
//! duration of one command. Every driver it opens for a serial backend is
//! wrapped in that backend's family lock, so no two hosts on the backend run
//! an operation at the same time.

use std::fmt;

use drover_plugins::{BaseDriver, Driver, DriverOptions, DriverResult, FamilyLocks, PluginPool};
use tracing::{debug, error, info, warn};

use crate::dispatch::{Action, ActionOutput, Dispatcher, HostReport};
use crate::error::{HostError, StoreError};
use crate::host::Host;
use crate::store::HostStore;

const SESSION_TARGET: &str = "drover::session";

/// Produces live drivers for host records.
pub trait DriverSource {
    /// Opens a driver for `driver_name` seeded with `raw_config`.
    ///
    /// # Errors
    ///
    /// Returns any launch, handshake, or configuration failure.
    fn open_driver(&self, driver_name: &str, raw_config: &[u8]) -> DriverResult<Box<dyn Driver>>;

    /// Releases every driver opened so far.
    fn release(&self) {}
}

impl DriverSource for PluginPool {
    fn open_driver(&self, driver_name: &str, raw_config: &[u8]) -> DriverResult<Box<dyn Driver>> {
        let bridge = self.open(driver_name, raw_config)?;
        Ok(Box::new(bridge))
    }

    fn release(&self) {
        let closed = self.shutdown();
        debug!(target: SESSION_TARGET, closed, "released plugin bridges");
    }
}

/// One command's view of the host store and driver plugins.
pub struct Session<'a> {
    store: &'a dyn HostStore,
    drivers: &'a dyn DriverSource,
    dispatcher: Dispatcher,
    families: FamilyLocks,
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store_path", &self.store.store_path())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    /// Creates a session using the default [`Dispatcher`].
    #[must_use]
    pub fn new(store: &'a dyn HostStore, drivers: &'a dyn DriverSource) -> Self {
        Self {
            store,
            drivers,
            dispatcher: Dispatcher::new(),
            families: FamilyLocks::new(),
        }
    }

    /// Replaces the dispatcher, and with it the set of serial backends.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Dispatcher used by [`Session::run_action`].
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Loads a host record and attaches a live driver.
    ///
    /// # Errors
    ///
    /// Returns the store's failure, or [`HostError::Driver`] if the driver
    /// cannot be opened.
    pub fn load_host(&self, name: &str) -> Result<Host, HostError> {
        let mut host = self.store.load(name)?;
        let driver = self
            .open(host.driver_name(), host.raw_config())
            .map_err(|source| HostError::driver(name, source))?;
        host.attach(driver);
        Ok(host)
    }

    fn open(&self, driver_name: &str, raw_config: &[u8]) -> DriverResult<Box<dyn Driver>> {
        let driver = self.drivers.open_driver(driver_name, raw_config)?;
        if self.dispatcher.is_serial(driver_name) {
            debug!(target: SESSION_TARGET, driver = driver_name, "wrapping serial driver");
            Ok(Box::new(self.families.wrap(driver_name, driver)))
        } else {
            Ok(driver)
        }
    }

    /// Applies `action` to the named hosts, then saves every one of them.
    ///
    /// Hosts are saved whether or not their action succeeded. Per-host
    /// failures appear only in the returned reports.
    ///
    /// # Errors
    ///
    /// Returns the first load failure; nothing is dispatched in that case.
    pub fn run_action<S: AsRef<str>>(
        &self,
        names: &[S],
        action: Action,
    ) -> Result<Vec<HostReport>, HostError> {
        let mut hosts = names
            .iter()
            .map(|name| self.load_host(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let reports = self.dispatcher.run_action(action, &mut hosts);
        for host in &mut hosts {
            self.persist(host);
        }
        Ok(reports)
    }

    /// Applies `action` to every stored host.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::run_action`], or if the store cannot list hosts.
    pub fn run_action_on_all(&self, action: Action) -> Result<Vec<HostReport>, HostError> {
        let names = self.store.list()?;
        self.run_action(names.as_slice(), action)
    }

    fn persist(&self, host: &mut Host) {
        if let Err(err) = host.refresh_config() {
            warn!(
                target: SESSION_TARGET,
                host = host.name(),
                error = %err,
                "saving last known configuration"
            );
        }
        if let Err(err) = self.store.save(host) {
            error!(target: SESSION_TARGET, host = host.name(), error = %err, "failed to save host");
        }
    }

    /// Creates a new host on `driver_name`.
    ///
    /// The backend receives a bare identity document, then its declared flag
    /// defaults overlaid with `overrides`. The record is saved before the
    /// machine is created and again once creation completes.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidName`], [`StoreError::AlreadyExists`], or
    /// the first store or driver failure.
    pub fn create_host(
        &self,
        name: &str,
        driver_name: &str,
        overrides: &DriverOptions,
    ) -> Result<Host, HostError> {
        validate_name(name)?;
        if self.store.exists(name)? {
            return Err(StoreError::AlreadyExists {
                name: name.to_owned(),
            }
            .into());
        }

        let identity = BaseDriver::new(name, self.store.store_path())
            .identity_document()
            .map_err(|source| HostError::driver(name, source))?;
        let live = self
            .open(driver_name, &identity)
            .map_err(|source| HostError::driver(name, source))?;
        let mut host = Host::new(name, driver_name, identity);
        host.attach(live);

        let flags = host.with_driver(|driver| driver.create_flags())?;
        let mut options = DriverOptions::from_defaults(&flags);
        options.merge(overrides);
        host.with_driver(|driver| driver.set_config_from_flags(&options))?;
        host.with_driver(|driver| driver.pre_create_check())?;

        host.refresh_config()?;
        self.store.save(&host)?;

        info!(target: SESSION_TARGET, host = name, driver = driver_name, "creating machine");
        host.with_driver(|driver| driver.create())?;
        host.refresh_config()?;
        self.store.save(&host)?;
        info!(target: SESSION_TARGET, host = name, "machine created");
        Ok(host)
    }

    /// Removes the named hosts, reporting each outcome in input order.
    ///
    /// A host whose driver fails to remove the machine keeps its record
    /// unless `force` is set.
    pub fn remove_hosts<S: AsRef<str>>(&self, names: &[S], force: bool) -> Vec<HostReport> {
        names
            .iter()
            .map(|name| {
                let host = name.as_ref().to_owned();
                let (driver, outcome) = self.remove_one(&host, force);
                if let Err(err) = &outcome {
                    error!(target: SESSION_TARGET, host = %host, error = %err, "failed to remove host");
                }
                HostReport {
                    host,
                    driver,
                    outcome,
                }
            })
            .collect()
    }

    fn remove_one(&self, name: &str, force: bool) -> (String, Result<ActionOutput, HostError>) {
        let mut host = match self.store.load(name) {
            Ok(host) => host,
            Err(err) => return (String::new(), Err(err.into())),
        };
        let driver_name = host.driver_name().to_owned();

        let removed = self
            .open(&driver_name, host.raw_config())
            .map_err(|source| HostError::driver(name, source))
            .and_then(|live| {
                host.attach(live);
                host.with_driver(|driver| driver.remove())
            });
        drop(host.detach());
        if let Err(err) = removed {
            if !force {
                return (driver_name, Err(err));
            }
            warn!(target: SESSION_TARGET, host = name, error = %err, "forcing removal");
        }

        let outcome = self
            .store
            .remove(name)
            .map(|()| ActionOutput::Done)
            .map_err(HostError::from);
        (driver_name, outcome)
    }

    /// Ends the session, releasing every driver the source opened.
    pub fn finish(self) {
        self.drivers.release();
    }
}

/// Loads the named hosts, applies `action`, and saves every host.
///
/// # Errors
///
/// Returns the first load failure; nothing is dispatched in that case.
pub fn run_action_with_store<S: AsRef<str>>(
    store: &dyn HostStore,
    drivers: &dyn DriverSource,
    names: &[S],
    action: Action,
) -> Result<Vec<HostReport>, HostError> {
    let session = Session::new(store, drivers);
    let reports = session.run_action(names, action);
    session.finish();
    reports
}

/// Checks that `name` starts with a letter or digit and otherwise contains
/// only letters, digits, `-` and `.`.
///
/// # Errors
///
/// Returns [`HostError::InvalidName`] otherwise.
pub fn validate_name(name: &str) -> Result<(), HostError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|first| first.is_ascii_alphanumeric())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '.');
    if valid {
        Ok(())
    } else {
        Err(HostError::InvalidName {
            name: name.to_owned(),
        })
    }
}
