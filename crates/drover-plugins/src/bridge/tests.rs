//! Unit tests for the RPC bridge using an instrumented in-memory transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::protocol::RpcResponse;

#[derive(Debug, Default)]
struct Recorder {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    methods: Mutex<Vec<String>>,
    plugin_closed: AtomicBool,
    reaped_with: Mutex<Option<Duration>>,
}

impl Recorder {
    fn methods(&self) -> Vec<String> {
        self.methods.lock().expect("methods lock").clone()
    }
}

struct FakeTransport {
    recorder: Arc<Recorder>,
    version: u32,
    config: String,
    delay: Duration,
    fail_on: Option<Method>,
}

impl FakeTransport {
    fn new(recorder: &Arc<Recorder>) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            version: PROTOCOL_VERSION,
            config: String::from("{}"),
            delay: Duration::ZERO,
            fail_on: None,
        }
    }

    fn answer(&mut self, request: &RpcRequest) -> DriverResult<RpcResponse> {
        let method = request.method()?;
        if self.fail_on == Some(method) {
            return Ok(RpcResponse::failure(request.id(), "start refused"));
        }
        let result = match method {
            Method::GetVersion => json!(self.version),
            Method::SetConfigRaw => {
                self.config = request
                    .params()
                    .as_str()
                    .expect("config travels as a string")
                    .to_owned();
                Value::Null
            }
            Method::GetConfigRaw => json!(self.config),
            Method::GetState => json!("Running"),
            Method::GetSshPort => json!(2222),
            Method::DriverName => json!("fake"),
            Method::GetIp => json!("10.0.0.7"),
            Method::SetConfigFromFlags => {
                let options: DriverOptions =
                    serde_json::from_value(request.params().clone()).expect("options");
                self.config = options.string("fake-ip").expect("fake-ip").to_owned();
                Value::Null
            }
            _ => Value::Null,
        };
        Ok(RpcResponse::success(request.id(), result))
    }
}

impl Transport for FakeTransport {
    fn round_trip(&mut self, request: &RpcRequest) -> DriverResult<RpcResponse> {
        let current = self.recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder
            .max_in_flight
            .fetch_max(current, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.recorder
            .methods
            .lock()
            .expect("methods lock")
            .push(request.method_name().to_owned());
        let response = self.answer(request);
        self.recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

struct FakePlugin {
    recorder: Arc<Recorder>,
}

impl PluginProcess for FakePlugin {
    fn address(&mut self) -> DriverResult<String> {
        Ok(String::from("127.0.0.1:0"))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.recorder.plugin_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&mut self, grace: Duration) {
        *self.recorder.reaped_with.lock().expect("reap lock") = Some(grace);
    }
}

#[fixture]
fn recorder() -> Arc<Recorder> {
    Arc::new(Recorder::default())
}

fn bridge_over(transport: FakeTransport, recorder: &Arc<Recorder>, raw: &[u8]) -> RpcBridge {
    let plugin = Box::new(FakePlugin {
        recorder: Arc::clone(recorder),
    });
    RpcBridge::establish(transport, plugin, raw).expect("establish bridge")
}

#[rstest]
fn establish_checks_version_then_forwards_config(recorder: Arc<Recorder>) {
    let bridge = bridge_over(
        FakeTransport::new(&recorder),
        &recorder,
        br#"{"MachineName":"dev"}"#,
    );
    assert_eq!(
        recorder.methods(),
        vec!["Driver.GetVersion", "Driver.SetConfigRaw"]
    );
    assert_eq!(
        bridge.config_raw().expect("config"),
        br#"{"MachineName":"dev"}"#.to_vec()
    );
}

#[rstest]
fn config_round_trips_across_intervening_calls(recorder: Arc<Recorder>) {
    let mut bridge = bridge_over(FakeTransport::new(&recorder), &recorder, b"{}");
    let document = br#"{"MachineName":"web-1","IPAddress":"10.0.0.9"}"#;
    bridge.set_config_raw(document).expect("set config");
    bridge.start().expect("start");
    assert_eq!(bridge.state().expect("state"), MachineState::Running);
    assert_eq!(bridge.ssh_port().expect("port"), 2222);
    assert_eq!(bridge.config_raw().expect("config"), document.to_vec());
}

#[rstest]
fn concurrent_callers_are_serialised(recorder: Arc<Recorder>) {
    let transport = FakeTransport {
        delay: Duration::from_millis(2),
        ..FakeTransport::new(&recorder)
    };
    let bridge = bridge_over(transport, &recorder, b"{}");

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..5 {
                    assert_eq!(bridge.ip().expect("ip"), "10.0.0.7");
                    assert_eq!(bridge.driver_name().expect("name"), "fake");
                }
            });
        }
    });

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.methods().len(), 2 + 8 * 5 * 2);
}

#[rstest]
fn close_is_terminal(recorder: Arc<Recorder>) {
    let mut bridge = bridge_over(FakeTransport::new(&recorder), &recorder, b"{}");
    bridge.close().expect("close");

    assert!(recorder.plugin_closed.load(Ordering::SeqCst));
    assert_eq!(
        *recorder.reaped_with.lock().expect("reap lock"),
        Some(DEFAULT_EXIT_GRACE)
    );
    assert_eq!(
        recorder.methods().last().map(String::as_str),
        Some("Driver.Close")
    );
    assert!(matches!(bridge.start(), Err(DriverError::Closed)));
    assert!(matches!(bridge.driver_name(), Err(DriverError::Closed)));
    assert!(matches!(bridge.close(), Err(DriverError::Closed)));
    assert_eq!(
        recorder
            .methods()
            .iter()
            .filter(|method| method.as_str() == "Driver.Close")
            .count(),
        1
    );
}

#[rstest]
fn closer_shuts_a_bridge_it_does_not_own(recorder: Arc<Recorder>) {
    let bridge = bridge_over(FakeTransport::new(&recorder), &recorder, b"{}");
    let closer = bridge.closer();
    closer.close().expect("close through handle");
    assert!(matches!(bridge.state(), Err(DriverError::Closed)));
    assert!(matches!(closer.close(), Err(DriverError::Closed)));
}

#[rstest]
fn version_mismatch_is_rejected(recorder: Arc<Recorder>) {
    let transport = FakeTransport {
        version: 7,
        ..FakeTransport::new(&recorder)
    };
    let plugin = Box::new(FakePlugin {
        recorder: Arc::clone(&recorder),
    });
    let error = RpcBridge::establish(transport, plugin, b"{}").expect_err("wrong version");
    assert!(matches!(
        error,
        DriverError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: 7
        }
    ));
    assert!(!recorder.methods().contains(&String::from("Driver.SetConfigRaw")));
}

#[rstest]
fn remote_failures_pass_through(recorder: Arc<Recorder>) {
    let transport = FakeTransport {
        fail_on: Some(Method::Start),
        ..FakeTransport::new(&recorder)
    };
    let mut bridge = bridge_over(transport, &recorder, b"{}");
    match bridge.start().expect_err("start fails remotely") {
        DriverError::Remote { method, message } => {
            assert_eq!(method, "Driver.Start");
            assert_eq!(message, "start refused");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
    bridge.stop().expect("later calls still work");
}

#[rstest]
fn flag_values_cross_the_bridge(recorder: Arc<Recorder>) {
    let mut bridge = bridge_over(FakeTransport::new(&recorder), &recorder, b"{}");
    let options = DriverOptions::new().with("fake-ip", "192.168.99.100");
    bridge.set_config_from_flags(&options).expect("apply flags");
    assert_eq!(
        bridge.config_raw().expect("config"),
        b"192.168.99.100".to_vec()
    );
}

#[rstest]
fn non_utf8_config_is_refused_locally(recorder: Arc<Recorder>) {
    let mut bridge = bridge_over(FakeTransport::new(&recorder), &recorder, b"{}");
    let error = bridge
        .set_config_raw(&[0xff, 0xfe])
        .expect_err("invalid utf-8");
    assert!(matches!(error, DriverError::Protocol { .. }));
}
