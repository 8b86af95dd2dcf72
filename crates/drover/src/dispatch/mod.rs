//! Applies one action to many hosts.
//!
//! Hosts whose backend tolerates concurrency run on their own scoped thread
//! and report back through a shared channel. Hosts in a serial family run one
//! at a time, in input order, while the parallel batch is in flight. Each
//! host's outcome is logged and returned; no failure aborts the batch.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, error, info};

use crate::error::HostError;
use crate::host::Host;
use crate::store::AuthConfigurer;

const DISPATCH_TARGET: &str = "drover::dispatch";

/// Backends that must never run an operation concurrently with themselves.
pub const SERIAL_DRIVERS: &[&str] = &["virtualbox"];

/// Operation applied across a set of hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum Action {
    /// Regenerates authentication material.
    ConfigureAuth,
    /// Starts the machine.
    Start,
    /// Stops the machine gracefully.
    Stop,
    /// Restarts the machine.
    Restart,
    /// Stops the machine forcefully.
    Kill,
    /// Upgrades the machine's runtime.
    Upgrade,
    /// Reports the machine's address.
    Ip,
}

impl Action {
    /// Name used on the command line and in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Runs the action against one loaded host.
    ///
    /// # Errors
    ///
    /// Returns the host's driver failure, or [`HostError::Auth`] when
    /// [`Action::ConfigureAuth`] runs without a configurer.
    pub fn apply(
        self,
        host: &mut Host,
        auth: Option<&dyn AuthConfigurer>,
    ) -> Result<ActionOutput, HostError> {
        match self {
            Self::ConfigureAuth => {
                let Some(configurer) = auth else {
                    return Err(HostError::Auth {
                        host: host.name().to_owned(),
                        message: String::from("no authentication configurer installed"),
                    });
                };
                configurer.configure_auth(host).map(|()| ActionOutput::Done)
            }
            Self::Start => host.with_driver(|driver| driver.start()).map(|()| ActionOutput::Done),
            Self::Stop => host.with_driver(|driver| driver.stop()).map(|()| ActionOutput::Done),
            Self::Restart => host
                .with_driver(|driver| driver.restart())
                .map(|()| ActionOutput::Done),
            Self::Kill => host.with_driver(|driver| driver.kill()).map(|()| ActionOutput::Done),
            Self::Upgrade => host
                .with_driver(|driver| driver.upgrade())
                .map(|()| ActionOutput::Done),
            Self::Ip => host.with_driver(|driver| driver.ip()).map(ActionOutput::Ip),
        }
    }
}

/// Value produced by a successful action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    /// The action completed with nothing to report.
    Done,
    /// The host's address.
    Ip(String),
}

/// Outcome of an action on one host.
#[derive(Debug, Clone)]
pub struct HostReport {
    /// Host name.
    pub host: String,
    /// Backend managing the host.
    pub driver: String,
    /// What the action produced.
    pub outcome: Result<ActionOutput, HostError>,
}

impl HostReport {
    /// Returns `true` if the action succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

type Outcome = Result<ActionOutput, HostError>;

/// Fans an action out across hosts.
#[derive(Clone)]
pub struct Dispatcher {
    serial: Vec<String>,
    auth: Option<Arc<dyn AuthConfigurer>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("serial", &self.serial)
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher that serialises [`SERIAL_DRIVERS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_serial_drivers(SERIAL_DRIVERS.iter().copied())
    }

    /// Creates a dispatcher that serialises the named backends.
    #[must_use]
    pub fn with_serial_drivers<I, S>(drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            serial: drivers.into_iter().map(Into::into).collect(),
            auth: None,
        }
    }

    /// Installs the collaborator used by [`Action::ConfigureAuth`].
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthConfigurer>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Returns `true` if hosts on `driver_name` run one at a time.
    #[must_use]
    pub fn is_serial(&self, driver_name: &str) -> bool {
        self.serial.iter().any(|name| name == driver_name)
    }

    /// Applies `action` to every host and reports each outcome in input order.
    ///
    /// Failures, including panics inside a driver, are logged and reported
    /// per host; they never abort the remaining hosts.
    pub fn run_action(&self, action: Action, hosts: &mut [Host]) -> Vec<HostReport> {
        if hosts.is_empty() {
            return Vec::new();
        }

        let identities: Vec<(String, String)> = hosts
            .iter()
            .map(|host| (host.name().to_owned(), host.driver_name().to_owned()))
            .collect();
        let mut outcomes: Vec<Option<Outcome>> = Vec::new();
        outcomes.resize_with(hosts.len(), || None);

        let (parallel, serial): (Vec<_>, Vec<_>) = hosts
            .iter_mut()
            .enumerate()
            .partition(|(_, host)| !self.is_serial(host.driver_name()));
        let expected = parallel.len();
        let auth = self.auth.as_deref();

        debug!(
            target: DISPATCH_TARGET,
            action = action.name(),
            parallel = expected,
            serial = serial.len(),
            "dispatching action"
        );

        thread::scope(|scope| {
            let (results, finished) = mpsc::channel::<(usize, Outcome)>();
            for (index, host) in parallel {
                let sender = results.clone();
                scope.spawn(move || {
                    let outcome = run_isolated(action, host, auth);
                    if sender.send((index, outcome)).is_err() {
                        debug!(target: DISPATCH_TARGET, index, "result receiver dropped");
                    }
                });
            }
            drop(results);

            for (index, host) in serial {
                let name = host.name().to_owned();
                let (reply, outcome_rx) = mpsc::channel::<Outcome>();
                scope.spawn(move || {
                    if reply.send(run_isolated(action, host, auth)).is_err() {
                        debug!(target: DISPATCH_TARGET, index, "serial receiver dropped");
                    }
                });
                let outcome = outcome_rx
                    .recv()
                    .unwrap_or_else(|_| Err(lost_outcome(&name)));
                log_outcome(action, &name, &outcome);
                record(&mut outcomes, index, outcome);
            }

            for _ in 0..expected {
                let Ok((index, outcome)) = finished.recv() else {
                    break;
                };
                if let Some((name, _)) = identities.get(index) {
                    log_outcome(action, name, &outcome);
                }
                record(&mut outcomes, index, outcome);
            }
        });

        identities
            .into_iter()
            .zip(outcomes)
            .map(|((host, driver), outcome)| {
                let resolved = outcome.unwrap_or_else(|| Err(lost_outcome(&host)));
                HostReport {
                    host,
                    driver,
                    outcome: resolved,
                }
            })
            .collect()
    }
}

fn run_isolated(action: Action, host: &mut Host, auth: Option<&dyn AuthConfigurer>) -> Outcome {
    let name = host.name().to_owned();
    panic::catch_unwind(AssertUnwindSafe(|| action.apply(host, auth))).unwrap_or_else(|payload| {
        Err(HostError::Panicked {
            host: name,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn record(outcomes: &mut [Option<Outcome>], index: usize, outcome: Outcome) {
    if let Some(slot) = outcomes.get_mut(index) {
        *slot = Some(outcome);
    }
}

fn lost_outcome(host: &str) -> HostError {
    HostError::Panicked {
        host: host.to_owned(),
        message: String::from("worker ended without reporting"),
    }
}

fn log_outcome(action: Action, host: &str, outcome: &Outcome) {
    match outcome {
        Ok(ActionOutput::Done) => {
            info!(target: DISPATCH_TARGET, host, action = action.name(), "action succeeded");
        }
        Ok(ActionOutput::Ip(address)) => {
            info!(target: DISPATCH_TARGET, host, action = action.name(), address = %address, "action succeeded");
        }
        Err(err) => {
            error!(target: DISPATCH_TARGET, host, action = action.name(), error = %err, "action failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
