//! Instrumented drivers and driver sources shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use drover_plugins::driver::{decode_config, encode_config};
use drover_plugins::{
    BaseDriver, Driver, DriverError, DriverOptions, DriverResult, FlagDescriptor, MachineState,
};

use crate::session::DriverSource;

/// One completed driver operation.
#[derive(Debug, Clone)]
pub(crate) struct Event {
    pub(crate) host: String,
    pub(crate) operation: String,
    pub(crate) started: Instant,
    pub(crate) finished: Instant,
}

impl Event {
    pub(crate) fn overlaps(&self, other: &Self) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Shared record of every timed operation.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event lock").clone()
    }

    pub(crate) fn for_host(&self, host: &str) -> Event {
        self.events()
            .into_iter()
            .find(|event| event.host == host)
            .unwrap_or_else(|| panic!("no event recorded for {host}"))
    }

    fn record(&self, event: Event) {
        self.events.lock().expect("event lock").push(event);
    }
}

/// Driver that records when each lifecycle operation ran.
#[derive(Debug)]
pub(crate) struct TimedDriver {
    base: BaseDriver,
    state: MachineState,
    delay: Duration,
    fail_on: Option<&'static str>,
    panic_on: Option<&'static str>,
    log: Arc<EventLog>,
}

impl TimedDriver {
    pub(crate) fn new(machine: &str, log: &Arc<EventLog>) -> Self {
        Self {
            base: BaseDriver::new(machine, "/store"),
            state: MachineState::Stopped,
            delay: Duration::ZERO,
            fail_on: None,
            panic_on: None,
            log: Arc::clone(log),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub(crate) fn panicking_on(mut self, operation: &'static str) -> Self {
        self.panic_on = Some(operation);
        self
    }

    fn timed(&mut self, operation: &str, next: MachineState) -> DriverResult<()> {
        let started = Instant::now();
        thread::sleep(self.delay);
        self.log.record(Event {
            host: self.base.machine_name.clone(),
            operation: operation.to_owned(),
            started,
            finished: Instant::now(),
        });
        assert!(self.panic_on != Some(operation), "driver panicked during {operation}");
        if self.fail_on == Some(operation) {
            return Err(DriverError::backend(format!("{operation} failed")));
        }
        self.state = next;
        Ok(())
    }
}

impl Driver for TimedDriver {
    fn driver_name(&self) -> DriverResult<String> {
        Ok(String::from("timed"))
    }

    fn machine_name(&self) -> DriverResult<String> {
        Ok(self.base.machine_name.clone())
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        Ok(vec![
            FlagDescriptor::string("timed-ip", "Address to report", "10.0.0.2"),
            FlagDescriptor::int("timed-ssh-port", "SSH port", 22),
        ])
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        self.base.ip_address = options.string("timed-ip")?.to_owned();
        self.base.ssh_port = u16::try_from(options.int("timed-ssh-port")?)
            .map_err(|err| DriverError::backend(err.to_string()))?;
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
        let current = self.state;
        self.timed("pre_create_check", current)
    }

    fn create(&mut self) -> DriverResult<()> {
        self.timed("create", MachineState::Running)
    }

    fn remove(&mut self) -> DriverResult<()> {
        self.timed("remove", MachineState::None)
    }

    fn start(&mut self) -> DriverResult<()> {
        self.timed("start", MachineState::Running)
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.timed("stop", MachineState::Stopped)
    }

    fn restart(&mut self) -> DriverResult<()> {
        self.timed("restart", MachineState::Running)
    }

    fn kill(&mut self) -> DriverResult<()> {
        self.timed("kill", MachineState::Stopped)
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        let current = self.state;
        self.timed("upgrade", current)
    }
}

/// Builds [`TimedDriver`]s in place of plugin bridges.
#[derive(Debug, Default)]
pub(crate) struct TimedSource {
    pub(crate) log: Arc<EventLog>,
    pub(crate) delay: Duration,
    pub(crate) failures: HashMap<String, &'static str>,
    pub(crate) opened: Mutex<Vec<String>>,
    pub(crate) released: AtomicUsize,
}

impl TimedSource {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn failing(mut self, machine: &str, operation: &'static str) -> Self {
        self.failures.insert(machine.to_owned(), operation);
        self
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }
}

impl DriverSource for TimedSource {
    fn open_driver(&self, driver_name: &str, raw_config: &[u8]) -> DriverResult<Box<dyn Driver>> {
        if driver_name == "missing" {
            return Err(DriverError::NotFound {
                name: driver_name.to_owned(),
                executable: format!("drover-driver-{driver_name}"),
            });
        }
        let mut driver = TimedDriver::new("", &self.log).with_delay(self.delay);
        driver.set_config_raw(raw_config)?;
        if let Some(operation) = self.failures.get(&driver.base.machine_name) {
            driver = driver.failing_on(*operation);
        }
        self.opened
            .lock()
            .expect("opened lock")
            .push(driver_name.to_owned());
        Ok(Box::new(driver))
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Raw configuration naming `machine`.
pub(crate) fn identity(machine: &str) -> Vec<u8> {
    BaseDriver::new(machine, "/store")
        .identity_document()
        .expect("identity document")
}
