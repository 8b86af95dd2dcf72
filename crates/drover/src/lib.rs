//! Host-level orchestration for Drover.
//!
//! A command names one or more hosts and an [`Action`]. A [`Session`] loads
//! each host from the [`HostStore`], attaches a driver bridge opened through
//! a [`DriverSource`] (normally a [`drover_plugins::PluginPool`]), and hands
//! the batch to the [`Dispatcher`]. Hosts whose backend tolerates concurrency
//! run in parallel; backends listed in [`SERIAL_DRIVERS`] run one host at a
//! time and, through the session's family locks, never overlap with
//! themselves. Every host is saved afterwards, whatever its outcome.
//!
//! Persistence and authentication are collaborators: this crate only defines
//! the [`HostStore`] and [`AuthConfigurer`] traits they implement.

pub mod dispatch;
pub mod error;
pub mod host;
pub mod plugins;
pub mod session;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use self::dispatch::{Action, ActionOutput, Dispatcher, HostReport, SERIAL_DRIVERS};
pub use self::error::{HostError, StoreError};
pub use self::host::Host;
pub use self::session::{DriverSource, Session, run_action_with_store, validate_name};
pub use self::store::{AuthConfigurer, HostStore};
pub use self::telemetry::{TelemetryError, TelemetryHandle};
