//! The capability contract every machine backend satisfies.
//!
//! [`Driver`] is implemented three ways: by concrete backends living inside a
//! plugin process, by [`RpcBridge`](crate::bridge::RpcBridge) which forwards
//! every operation to such a process, and by
//! [`Synchronized`](crate::guard::Synchronized) which serialises another
//! driver's operations behind a lock.
//!
//! Backend state is exchanged as one JSON document. Each backend owns an
//! explicit serde schema for it, normally embedding [`BaseDriver`] for the
//! identity fields every machine shares.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::flags::{DriverOptions, FlagDescriptor};

/// Lifecycle state reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// The backend has no machine, or cannot tell.
    #[default]
    None,
    /// Running and reachable.
    Running,
    /// Paused in memory.
    Paused,
    /// Suspended to disk.
    Saved,
    /// Powered off.
    Stopped,
    /// Shutting down.
    Stopping,
    /// Booting.
    Starting,
    /// The backend reported a failure.
    Error,
    /// A state query timed out.
    Timeout,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Saved => "Saved",
            Self::Stopped => "Stopped",
            Self::Stopping => "Stopping",
            Self::Starting => "Starting",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
        };
        f.write_str(label)
    }
}

/// Capability set of one infrastructure backend.
///
/// Every operation is fallible. When the driver is a bridge, a failure may
/// come from the transport or from the backend; callers see the same
/// [`DriverError`] either way.
pub trait Driver: Send {
    /// Name the backend is registered under.
    fn driver_name(&self) -> DriverResult<String>;

    /// Name of the machine this driver controls.
    fn machine_name(&self) -> DriverResult<String>;

    /// Flags the backend accepts at creation time.
    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>>;

    /// Applies flag values gathered from the user.
    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()>;

    /// Serialises the backend's entire state.
    fn config_raw(&self) -> DriverResult<Vec<u8>>;

    /// Replaces the backend's entire state from a serialised document.
    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()>;

    /// Current machine state.
    fn state(&self) -> DriverResult<MachineState>;

    /// Engine URL, e.g. `tcp://1.2.3.4:2376`.
    fn url(&self) -> DriverResult<String>;

    /// Address the machine is reachable at.
    fn ip(&self) -> DriverResult<String>;

    /// Hostname for SSH sessions.
    fn ssh_hostname(&self) -> DriverResult<String>;

    /// Port for SSH sessions.
    fn ssh_port(&self) -> DriverResult<u16>;

    /// Username for SSH sessions.
    fn ssh_username(&self) -> DriverResult<String>;

    /// Private key path for SSH sessions.
    fn ssh_key_path(&self) -> DriverResult<String>;

    /// Path of a per-machine artefact.
    fn local_artifact_path(&self, file: &str) -> DriverResult<String>;

    /// Path of the shared artefact directory.
    fn global_artifact_path(&self) -> DriverResult<String>;

    /// Validates that creation can proceed.
    fn pre_create_check(&mut self) -> DriverResult<()>;

    /// Creates the machine.
    fn create(&mut self) -> DriverResult<()>;

    /// Destroys the machine.
    fn remove(&mut self) -> DriverResult<()>;

    /// Boots the machine.
    fn start(&mut self) -> DriverResult<()>;

    /// Shuts the machine down gracefully.
    fn stop(&mut self) -> DriverResult<()>;

    /// Restarts the machine.
    fn restart(&mut self) -> DriverResult<()>;

    /// Powers the machine off forcefully.
    fn kill(&mut self) -> DriverResult<()>;

    /// Upgrades the machine's engine.
    fn upgrade(&mut self) -> DriverResult<()>;
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn driver_name(&self) -> DriverResult<String> {
        (**self).driver_name()
    }

    fn machine_name(&self) -> DriverResult<String> {
        (**self).machine_name()
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        (**self).create_flags()
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        (**self).set_config_from_flags(options)
    }

    fn config_raw(&self) -> DriverResult<Vec<u8>> {
        (**self).config_raw()
    }

    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()> {
        (**self).set_config_raw(data)
    }

    fn state(&self) -> DriverResult<MachineState> {
        (**self).state()
    }

    fn url(&self) -> DriverResult<String> {
        (**self).url()
    }

    fn ip(&self) -> DriverResult<String> {
        (**self).ip()
    }

    fn ssh_hostname(&self) -> DriverResult<String> {
        (**self).ssh_hostname()
    }

    fn ssh_port(&self) -> DriverResult<u16> {
        (**self).ssh_port()
    }

    fn ssh_username(&self) -> DriverResult<String> {
        (**self).ssh_username()
    }

    fn ssh_key_path(&self) -> DriverResult<String> {
        (**self).ssh_key_path()
    }

    fn local_artifact_path(&self, file: &str) -> DriverResult<String> {
        (**self).local_artifact_path(file)
    }

    fn global_artifact_path(&self) -> DriverResult<String> {
        (**self).global_artifact_path()
    }

    fn pre_create_check(&mut self) -> DriverResult<()> {
        (**self).pre_create_check()
    }

    fn create(&mut self) -> DriverResult<()> {
        (**self).create()
    }

    fn remove(&mut self) -> DriverResult<()> {
        (**self).remove()
    }

    fn start(&mut self) -> DriverResult<()> {
        (**self).start()
    }

    fn stop(&mut self) -> DriverResult<()> {
        (**self).stop()
    }

    fn restart(&mut self) -> DriverResult<()> {
        (**self).restart()
    }

    fn kill(&mut self) -> DriverResult<()> {
        (**self).kill()
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        (**self).upgrade()
    }
}

/// Identity and connection fields shared by every backend schema.
///
/// Every field defaults, so the minimal document produced by
/// [`BaseDriver::identity_document`] (machine name and store path only) can
/// be handed to any backend before its own flags are known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseDriver {
    /// Name of the machine.
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    /// Root directory for machine artefacts.
    #[serde(rename = "StorePath")]
    pub store_path: String,
    /// Last known address.
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    /// SSH username.
    #[serde(rename = "SSHUser")]
    pub ssh_user: String,
    /// SSH port; zero means the backend default.
    #[serde(rename = "SSHPort")]
    pub ssh_port: u16,
    /// Explicit SSH key path; empty means the per-machine default.
    #[serde(rename = "SSHKeyPath")]
    pub ssh_key_path: String,
}

const DEFAULT_SSH_USER: &str = "docker";
const DEFAULT_SSH_PORT: u16 = 22;

impl BaseDriver {
    /// Creates the identity known before a backend is chosen.
    #[must_use]
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ..Self::default()
        }
    }

    /// Serialises only what is known before backend selection.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] if serialisation fails.
    pub fn identity_document(&self) -> DriverResult<Vec<u8>> {
        encode_config(&Self::new(self.machine_name.clone(), self.store_path.clone()))
    }

    /// SSH username, falling back to the conventional default.
    #[must_use]
    pub fn ssh_username(&self) -> String {
        if self.ssh_user.is_empty() {
            DEFAULT_SSH_USER.to_owned()
        } else {
            self.ssh_user.clone()
        }
    }

    /// SSH port, falling back to 22.
    #[must_use]
    pub const fn ssh_port(&self) -> u16 {
        if self.ssh_port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.ssh_port
        }
    }

    /// Path of a file inside this machine's artefact directory.
    #[must_use]
    pub fn local_artifact_path(&self, file: &str) -> String {
        format!("{}/machines/{}/{file}", self.store_path, self.machine_name)
    }

    /// Shared artefact directory.
    #[must_use]
    pub fn global_artifact_path(&self) -> String {
        self.store_path.clone()
    }

    /// SSH key path, defaulting to `id_rsa` in the machine directory.
    #[must_use]
    pub fn ssh_key_path(&self) -> String {
        if self.ssh_key_path.is_empty() {
            self.local_artifact_path("id_rsa")
        } else {
            self.ssh_key_path.clone()
        }
    }
}

/// Encodes a backend schema as its configuration document.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if serialisation fails.
pub fn encode_config<T: Serialize>(config: &T) -> DriverResult<Vec<u8>> {
    serde_json::to_vec(config).map_err(DriverError::from)
}

/// Decodes a configuration document into a backend schema.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if the document does not match the
/// schema.
pub fn decode_config<T: DeserializeOwned>(data: &[u8]) -> DriverResult<T> {
    serde_json::from_slice(data).map_err(DriverError::from)
}
