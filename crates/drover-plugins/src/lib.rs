//! Out-of-process machine drivers for Drover.
//!
//! Every infrastructure backend runs as its own plugin executable. This crate
//! provides both halves of the boundary:
//!
//! - on the host side, the [`PluginLauncher`] starts a plugin and reads the
//!   address it announces, and an [`RpcBridge`] implements [`Driver`] by
//!   forwarding each operation, one at a time, over a TCP connection;
//! - on the plugin side, [`server::run_plugin`] and
//!   [`server::run_registered`] expose a concrete [`Driver`] through an
//!   [`RpcServer`] that isolates backend panics per call.
//!
//! Backends that cannot tolerate concurrent use are wrapped in
//! [`Synchronized`], which forces every operation through a shared lock.
//!
//! # Example
//!
//! ```rust,no_run
//! use drover_plugins::{BaseDriver, Driver, PluginLauncher, PluginPool};
//!
//! let pool = PluginPool::new(PluginLauncher::new());
//! let identity = BaseDriver::new("dev", "/var/lib/drover").identity_document()?;
//! let mut driver = pool.open("fake", &identity)?;
//! driver.start()?;
//! let _address = driver.ip()?;
//! pool.shutdown();
//! # Ok::<(), drover_plugins::DriverError>(())
//! ```

pub mod bridge;
pub mod driver;
pub mod error;
pub mod flags;
pub mod guard;
pub mod launcher;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use self::bridge::{BridgeCloser, RpcBridge};
pub use self::driver::{BaseDriver, Driver, MachineState};
pub use self::error::{DriverError, DriverResult};
pub use self::flags::{DriverOptions, FlagDescriptor, FlagKind, FlagValue};
pub use self::guard::{FamilyLocks, Synchronized};
pub use self::launcher::{LocalBinaryPlugin, PluginLauncher, PluginProcess};
pub use self::pool::PluginPool;
pub use self::protocol::{Method, PROTOCOL_VERSION};
pub use self::registry::DriverRegistry;
pub use self::server::RpcServer;
