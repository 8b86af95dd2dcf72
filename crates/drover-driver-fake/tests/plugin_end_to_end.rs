//! Launches the fake plugin executables and drives them through the bridge.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use drover::{Action, ActionOutput, Dispatcher, Host, HostStore, Session, StoreError};
use drover_plugins::{
    BaseDriver, Driver, DriverError, DriverOptions, MachineState, PluginLauncher, PluginPool,
    RpcBridge,
};
use rstest::{fixture, rstest};

#[fixture]
fn launcher() -> PluginLauncher {
    let binary = Path::new(env!("CARGO_BIN_EXE_drover-driver-fake"));
    let dir = binary.parent().expect("binary directory");
    PluginLauncher::new().with_search_dir(dir)
}

fn connect(launcher: &PluginLauncher, driver: &str, machine: &str) -> RpcBridge {
    let plugin = launcher.launch(driver).expect("launch plugin");
    let identity = BaseDriver::new(machine, "/tmp/drover-store")
        .identity_document()
        .expect("identity");
    RpcBridge::connect(plugin, &identity).expect("connect bridge")
}

fn options_for(bridge: &RpcBridge, overrides: &DriverOptions) -> DriverOptions {
    let flags = bridge.create_flags().expect("flags");
    let mut options = DriverOptions::from_defaults(&flags);
    options.merge(overrides);
    options
}

#[rstest]
fn lifecycle_runs_through_the_plugin(launcher: PluginLauncher) {
    let mut bridge = connect(&launcher, "fake", "e2e");
    assert_eq!(bridge.driver_name().expect("driver"), "fake");
    assert_eq!(bridge.machine_name().expect("machine"), "e2e");

    let overrides = DriverOptions::new().with("fake-ip", "203.0.113.4");
    let options = options_for(&bridge, &overrides);
    bridge.set_config_from_flags(&options).expect("flags");
    bridge.create().expect("create");
    bridge.stop().expect("stop");
    bridge.start().expect("start");

    assert_eq!(bridge.state().expect("state"), MachineState::Running);
    assert_eq!(bridge.ip().expect("ip"), "203.0.113.4");
    assert_eq!(bridge.url().expect("url"), "tcp://203.0.113.4:2376");
    assert_eq!(bridge.ssh_port().expect("port"), 22);
    assert_eq!(
        bridge.local_artifact_path("id_rsa").expect("artifact"),
        "/tmp/drover-store/machines/e2e/id_rsa"
    );

    let raw = String::from_utf8(bridge.config_raw().expect("raw")).expect("utf-8");
    assert!(raw.contains("\"State\":\"Running\""), "raw: {raw}");

    bridge.close().expect("close");
    assert!(matches!(bridge.state(), Err(DriverError::Closed)));
}

#[rstest]
fn executable_name_selects_the_driver(launcher: PluginLauncher) {
    let mut bridge = connect(&launcher, "fakeserial", "serial");
    assert_eq!(bridge.driver_name().expect("driver"), "fakeserial");
    bridge.close().expect("close");
}

#[rstest]
fn backend_failures_and_panics_arrive_as_remote_errors(launcher: PluginLauncher) {
    let mut bridge = connect(&launcher, "fake", "flaky");
    let overrides = DriverOptions::new()
        .with("fake-fail-on", vec![String::from("stop")])
        .with("fake-panic-on", vec![String::from("kill")]);
    let options = options_for(&bridge, &overrides);
    bridge.set_config_from_flags(&options).expect("flags");
    bridge.start().expect("start");

    match bridge.stop() {
        Err(DriverError::Remote { method, message }) => {
            assert_eq!(method, "Driver.Stop");
            assert_eq!(message, "fake stop failure");
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
    match bridge.kill() {
        Err(DriverError::Remote { message, .. }) => {
            assert!(message.contains("panic in Driver.Kill"), "message: {message}");
        }
        other => panic!("expected remote panic, got {other:?}"),
    }

    assert_eq!(bridge.state().expect("plugin survives"), MachineState::Running);
    bridge.close().expect("close");
}

#[rstest]
fn unknown_drivers_are_not_found(launcher: PluginLauncher) {
    assert!(matches!(
        launcher.launch("no-such-backend"),
        Err(DriverError::NotFound { .. })
    ));
}

#[derive(Debug, Default)]
struct MemoryStore {
    hosts: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
}

impl MemoryStore {
    fn raw(&self, name: &str) -> String {
        let hosts = self.hosts.lock().expect("store lock");
        let (_, raw) = hosts.get(name).expect("stored host");
        String::from_utf8_lossy(raw).into_owned()
    }
}

impl HostStore for MemoryStore {
    fn store_path(&self) -> String {
        String::from("/tmp/drover-store")
    }

    fn load(&self, name: &str) -> Result<Host, StoreError> {
        let hosts = self.hosts.lock().expect("store lock");
        let (driver, raw) = hosts.get(name).ok_or_else(|| StoreError::NotFound {
            name: name.to_owned(),
        })?;
        Ok(Host::new(name, driver.as_str(), raw.clone()))
    }

    fn save(&self, host: &Host) -> Result<(), StoreError> {
        self.hosts.lock().expect("store lock").insert(
            host.name().to_owned(),
            (host.driver_name().to_owned(), host.raw_config().to_vec()),
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.hosts.lock().expect("store lock").keys().cloned().collect())
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.hosts.lock().expect("store lock").contains_key(name))
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.hosts
            .lock()
            .expect("store lock")
            .remove(name)
            .map(drop)
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_owned(),
            })
    }
}

#[rstest]
fn sessions_create_dispatch_and_remove_hosts(launcher: PluginLauncher) {
    let store = MemoryStore::default();
    let pool = PluginPool::new(launcher);
    let session = Session::new(&store, &pool)
        .with_dispatcher(Dispatcher::with_serial_drivers(["fakeserial"]));

    for (name, driver, ip) in [
        ("alpha", "fake", "192.0.2.1"),
        ("beta", "fake", "192.0.2.2"),
        ("gamma", "fakeserial", "192.0.2.3"),
        ("delta", "fakeserial", "192.0.2.4"),
    ] {
        let overrides = DriverOptions::new().with("fake-ip", ip);
        session
            .create_host(name, driver, &overrides)
            .expect("create host");
    }
    assert!(store.raw("gamma").contains("\"State\":\"Running\""));

    let stopped = session
        .run_action(&["alpha", "beta", "gamma", "delta"], Action::Stop)
        .expect("stop");
    assert!(stopped.iter().all(|report| report.is_success()), "{stopped:?}");
    assert!(store.raw("delta").contains("\"State\":\"Stopped\""));

    let addresses: Vec<ActionOutput> = session
        .run_action_on_all(Action::Ip)
        .expect("ip")
        .into_iter()
        .map(|report| report.outcome.expect("address"))
        .collect();
    assert_eq!(
        addresses,
        [
            ActionOutput::Ip(String::from("192.0.2.1")),
            ActionOutput::Ip(String::from("192.0.2.2")),
            ActionOutput::Ip(String::from("192.0.2.4")),
            ActionOutput::Ip(String::from("192.0.2.3")),
        ]
    );

    let removed = session.remove_hosts(&["beta"], false);
    assert!(removed.iter().all(|report| report.is_success()));
    assert!(!store.exists("beta").expect("exists"));

    session.finish();
    assert_eq!(pool.tracked(), 0);
}
