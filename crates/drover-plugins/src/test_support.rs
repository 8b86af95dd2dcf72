//! In-process driver used by unit tests across the crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::driver::{BaseDriver, Driver, MachineState, decode_config, encode_config};
use crate::error::{DriverError, DriverResult};
use crate::flags::{DriverOptions, FlagDescriptor};

/// Shared observation point for stub activity.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Activity {
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn enter(&self, operation: &str) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls
            .lock()
            .expect("calls lock")
            .push(operation.to_owned());
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Minimal backend whose behaviour is set per test.
#[derive(Debug)]
pub(crate) struct StubDriver {
    pub(crate) base: BaseDriver,
    pub(crate) state: MachineState,
    pub(crate) panic_on: Option<&'static str>,
    pub(crate) fail_on: Option<&'static str>,
    pub(crate) delay: Duration,
    pub(crate) activity: Arc<Activity>,
}

impl StubDriver {
    pub(crate) fn new(activity: &Arc<Activity>) -> Self {
        Self {
            base: BaseDriver::new("stub-machine", "/tmp/drover"),
            state: MachineState::Stopped,
            panic_on: None,
            fail_on: None,
            delay: Duration::ZERO,
            activity: Arc::clone(activity),
        }
    }

    fn act(&mut self, operation: &str, next: Option<MachineState>) -> DriverResult<()> {
        self.activity.enter(operation);
        thread::sleep(self.delay);
        self.activity.leave();
        assert!(self.panic_on != Some(operation), "stub told to panic on {operation}");
        if self.fail_on == Some(operation) {
            return Err(DriverError::backend(format!("{operation} refused")));
        }
        if let Some(state) = next {
            self.state = state;
        }
        Ok(())
    }
}

impl Driver for StubDriver {
    fn driver_name(&self) -> DriverResult<String> {
        Ok(String::from("stub"))
    }

    fn machine_name(&self) -> DriverResult<String> {
        Ok(self.base.machine_name.clone())
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        Ok(vec![FlagDescriptor::string(
            "stub-ip",
            "Address to report",
            "10.0.0.1",
        )])
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        self.base.ip_address = options.string("stub-ip")?.to_owned();
        Ok(())
    }

    fn config_raw(&self) -> DriverResult<Vec<u8>> {
        encode_config(&self.base)
    }

    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()> {
        self.base = decode_config(data)?;
        Ok(())
    }

    fn state(&self) -> DriverResult<MachineState> {
        Ok(self.state)
    }

    fn url(&self) -> DriverResult<String> {
        Ok(format!("tcp://{}:2376", self.base.ip_address))
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
        self.act("pre_create_check", None)
    }

    fn create(&mut self) -> DriverResult<()> {
        self.act("create", Some(MachineState::Running))
    }

    fn remove(&mut self) -> DriverResult<()> {
        self.act("remove", Some(MachineState::None))
    }

    fn start(&mut self) -> DriverResult<()> {
        self.act("start", Some(MachineState::Running))
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.act("stop", Some(MachineState::Stopped))
    }

    fn restart(&mut self) -> DriverResult<()> {
        self.act("restart", Some(MachineState::Running))
    }

    fn kill(&mut self) -> DriverResult<()> {
        self.act("kill", Some(MachineState::Stopped))
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        self.act("upgrade", None)
    }
}
