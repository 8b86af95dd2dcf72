//! In-memory backend served as a real plugin executable.
//!
//! [`FakeDriver`] provisions nothing. It tracks a [`MachineState`] through the
//! lifecycle operations and can be told, through its creation flags, to
//! sleep, fail, or panic inside chosen operations. The same library backs
//! two executables, `drover-driver-fake` and `drover-driver-fakeserial`; the
//! running binary's name selects which driver it serves.

use std::io;
use std::mem;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use drover_plugins::driver::{decode_config, encode_config};
use drover_plugins::server::run_registered;
use drover_plugins::{
    BaseDriver, Driver, DriverError, DriverOptions, DriverRegistry, DriverResult, FlagDescriptor,
    MachineState,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use tracing_subscriber::EnvFilter;

const FAKE_TARGET: &str = "drover_driver_fake";

/// Environment variable holding the plugin's log filter.
pub const LOG_FILTER_ENV: &str = "DROVER_LOG_FILTER";

const FLAG_IP: &str = "fake-ip";
const FLAG_SSH_PORT: &str = "fake-ssh-port";
const FLAG_FAIL_ON: &str = "fake-fail-on";
const FLAG_PANIC_ON: &str = "fake-panic-on";
const FLAG_DELAY_MS: &str = "fake-delay-ms";

/// Backend state carried in the host's configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeDriver {
    #[serde(flatten)]
    base: BaseDriver,
    #[serde(rename = "State")]
    state: MachineState,
    #[serde(rename = "FailOn")]
    fail_on: Vec<String>,
    #[serde(rename = "PanicOn")]
    panic_on: Vec<String>,
    #[serde(rename = "DelayMs")]
    delay_ms: u64,
    #[serde(skip)]
    name: String,
}

impl FakeDriver {
    /// Creates an unconfigured driver reporting `name` as its driver name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Shared identity fields.
    #[must_use]
    pub const fn base(&self) -> &BaseDriver {
        &self.base
    }

    fn step(&mut self, operation: &str, next: Option<MachineState>) -> DriverResult<()> {
        if self.delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.delay_ms));
        }
        assert!(
            !self.panic_on.iter().any(|op| op == operation),
            "fake driver panicked during {operation}"
        );
        if self.fail_on.iter().any(|op| op == operation) {
            return Err(DriverError::backend(format!("fake {operation} failure")));
        }
        if let Some(state) = next {
            self.state = state;
        }
        Ok(())
    }
}

impl Driver for FakeDriver {
    fn driver_name(&self) -> DriverResult<String> {
        Ok(self.name.clone())
    }

    fn machine_name(&self) -> DriverResult<String> {
        Ok(self.base.machine_name.clone())
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        Ok(vec![
            FlagDescriptor::string(FLAG_IP, "Address the fake machine reports", "127.0.0.1")
                .with_env_var("FAKE_IP"),
            FlagDescriptor::int(FLAG_SSH_PORT, "SSH port the fake machine reports", 22),
            FlagDescriptor::string_slice(FLAG_FAIL_ON, "Operations that return an error", Vec::new()),
            FlagDescriptor::string_slice(FLAG_PANIC_ON, "Operations that panic", Vec::new()),
            FlagDescriptor::int(FLAG_DELAY_MS, "Delay added to every lifecycle operation", 0),
        ])
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        options.string(FLAG_IP)?.clone_into(&mut self.base.ip_address);
        self.base.ssh_port = u16::try_from(options.int(FLAG_SSH_PORT)?)
            .map_err(|err| DriverError::backend(format!("invalid {FLAG_SSH_PORT}: {err}")))?;
        self.fail_on = options.string_slice(FLAG_FAIL_ON)?.to_vec();
        self.panic_on = options.string_slice(FLAG_PANIC_ON)?.to_vec();
        self.delay_ms = u64::try_from(options.int(FLAG_DELAY_MS)?)
            .map_err(|err| DriverError::backend(format!("invalid {FLAG_DELAY_MS}: {err}")))?;
        Ok(())
    }

    fn config_raw(&self) -> DriverResult<Vec<u8>> {
        encode_config(self)
    }

    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()> {
        let decoded: Self = decode_config(data)?;
        let name = mem::take(&mut self.name);
        *self = Self { name, ..decoded };
        Ok(())
    }

    fn state(&self) -> DriverResult<MachineState> {
        Ok(self.state)
    }

    fn url(&self) -> DriverResult<String> {
        if self.state == MachineState::Running {
            Ok(format!("tcp://{}:2376", self.base.ip_address))
        } else {
            Err(DriverError::backend(format!(
                "machine '{}' is not running",
                self.base.machine_name
            )))
        }
    }

    fn ip(&self) -> DriverResult<String> {
        Ok(self.base.ip_address.clone())
    }

    fn ssh_hostname(&self) -> DriverResult<String> {
        self.ip()
    }

    fn ssh_port(&self) -> DriverResult<u16> {
        Ok(self.base.ssh_port())
    }

    fn ssh_username(&self) -> DriverResult<String> {
        Ok(self.base.ssh_username())
    }

    fn ssh_key_path(&self) -> DriverResult<String> {
        Ok(self.base.ssh_key_path())
    }

    fn local_artifact_path(&self, file: &str) -> DriverResult<String> {
        Ok(self.base.local_artifact_path(file))
    }

    fn global_artifact_path(&self) -> DriverResult<String> {
        Ok(self.base.global_artifact_path())
    }

    fn pre_create_check(&mut self) -> DriverResult<()> {
        self.step("pre_create_check", None)
    }

    fn create(&mut self) -> DriverResult<()> {
        self.step("create", Some(MachineState::Running))
    }

    fn remove(&mut self) -> DriverResult<()> {
        self.step("remove", Some(MachineState::None))
    }

    fn start(&mut self) -> DriverResult<()> {
        self.step("start", Some(MachineState::Running))
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.step("stop", Some(MachineState::Stopped))
    }

    fn restart(&mut self) -> DriverResult<()> {
        self.step("restart", Some(MachineState::Running))
    }

    fn kill(&mut self) -> DriverResult<()> {
        self.step("kill", Some(MachineState::Stopped))
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        self.step("upgrade", None)
    }
}

fn fake() -> Box<dyn Driver> {
    Box::new(FakeDriver::named("fake"))
}

fn fakeserial() -> Box<dyn Driver> {
    Box::new(FakeDriver::named("fakeserial"))
}

/// Registry holding both fake drivers.
///
/// # Errors
///
/// Returns [`DriverError::AlreadyRegistered`] only if the names collide.
pub fn registry() -> DriverResult<DriverRegistry> {
    let mut registry = DriverRegistry::new();
    registry.register("fake", fake)?;
    registry.register("fakeserial", fakeserial)?;
    Ok(registry)
}

/// Runs the plugin server for the driver named by this executable.
#[must_use]
pub fn main_entry() -> ExitCode {
    init_logging();
    match registry().and_then(|drivers| run_registered(&drivers)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: FAKE_TARGET, error = %err, "fake plugin failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .compact()
        .try_init()
        .ok();
}
