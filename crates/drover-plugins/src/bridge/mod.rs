//! Client-side driver that forwards every operation to a plugin process.
//!
//! An [`RpcBridge`] owns one dispatch thread. The thread owns the transport
//! and the plugin handle; callers enqueue [`RpcCall`]s and block on a
//! one-shot reply channel. Because only the dispatch thread touches the
//! transport, at most one call is in flight per bridge no matter how many
//! threads share it.
//!
//! Closing is routed through the same queue. The dispatch thread stops the
//! plugin's diagnostic logging, sends the remote `Close`, waits for the plugin
//! process to exit (killing it if it lingers), replies, and exits.
//! Every call made afterwards fails with [`DriverError::Closed`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::driver::{Driver, MachineState};
use crate::error::{DriverError, DriverResult};
use crate::flags::{DriverOptions, FlagDescriptor};
use crate::launcher::{DEFAULT_EXIT_GRACE, PluginProcess};
use crate::protocol::{Method, PROTOCOL_VERSION, RpcRequest, decode_value, encode_value};
use crate::transport::{TcpTransport, Transport};

/// Tracing target for bridge operations.
const BRIDGE_TARGET: &str = "drover_plugins::bridge";

/// One queued remote invocation.
#[derive(Debug)]
pub struct RpcCall {
    method: Method,
    params: Value,
    reply: Sender<DriverResult<Value>>,
}

/// Forwards [`Driver`] operations to a plugin process.
#[derive(Debug)]
pub struct RpcBridge {
    calls: Sender<RpcCall>,
    worker: Option<JoinHandle<()>>,
}

/// Closes a bridge from outside its owner.
#[derive(Debug, Clone)]
pub struct BridgeCloser {
    calls: Sender<RpcCall>,
}

impl BridgeCloser {
    /// Closes the bridge this handle was taken from.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the bridge is already closed, or
    /// the failure reported by the remote `Close`.
    pub fn close(&self) -> DriverResult<()> {
        send_call(&self.calls, Method::Close, Value::Null).map(drop)
    }
}

impl RpcBridge {
    /// Resolves the plugin's address, dials it, and hands it `raw_config`.
    ///
    /// # Errors
    ///
    /// Fails when the handshake, the connection, the version check, or the
    /// initial configuration transfer fails. A plugin that cannot be dialled
    /// is killed before the error is returned.
    pub fn connect<P>(mut plugin: P, raw_config: &[u8]) -> DriverResult<Self>
    where
        P: PluginProcess + 'static,
    {
        let address = plugin.address()?;
        let transport = TcpTransport::connect(&address).map_err(|err| {
            plugin.terminate(Duration::ZERO);
            err
        })?;
        Self::establish(transport, Box::new(plugin), raw_config)
    }

    /// Starts a bridge over an already connected transport.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::VersionMismatch`] if the plugin speaks another
    /// protocol revision, or any failure from the initial configuration
    /// transfer. The bridge is closed before the error is returned.
    pub fn establish<T>(
        transport: T,
        plugin: Box<dyn PluginProcess>,
        raw_config: &[u8],
    ) -> DriverResult<Self>
    where
        T: Transport + 'static,
    {
        let (calls, queue) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(String::from("drover-bridge"))
            .spawn(move || dispatch_loop(transport, plugin, &queue))
            .map_err(|err| DriverError::io("starting bridge dispatch thread", err))?;
        let mut bridge = Self {
            calls,
            worker: Some(worker),
        };

        let version: u32 = bridge.call_as(Method::GetVersion, Value::Null)?;
        if version != PROTOCOL_VERSION {
            return Err(DriverError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: version,
            });
        }
        bridge.set_config_raw(raw_config)?;
        Ok(bridge)
    }

    /// Returns a handle that can close this bridge.
    #[must_use]
    pub fn closer(&self) -> BridgeCloser {
        BridgeCloser {
            calls: self.calls.clone(),
        }
    }

    /// Closes the plugin session and waits for the dispatch thread to end.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the bridge was already closed, or
    /// the failure reported by the remote `Close`.
    pub fn close(&mut self) -> DriverResult<()> {
        let outcome = self.call(Method::Close, Value::Null).map(drop);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!(target: BRIDGE_TARGET, "bridge dispatch thread panicked");
        }
        outcome
    }

    fn call(&self, method: Method, params: Value) -> DriverResult<Value> {
        send_call(&self.calls, method, params)
    }

    fn call_as<T: DeserializeOwned>(&self, method: Method, params: Value) -> DriverResult<T> {
        decode_value(self.call(method, params)?)
    }

    fn invoke(&self, method: Method) -> DriverResult<()> {
        self.call(method, Value::Null).map(drop)
    }
}

impl Drop for RpcBridge {
    fn drop(&mut self) {
        // Fire and forget: the reply receiver is dropped immediately.
        let (reply, _) = mpsc::channel();
        drop(self.calls.send(RpcCall {
            method: Method::Close,
            params: Value::Null,
            reply,
        }));
    }
}

fn send_call(calls: &Sender<RpcCall>, method: Method, params: Value) -> DriverResult<Value> {
    let (reply, response) = mpsc::channel();
    calls
        .send(RpcCall {
            method,
            params,
            reply,
        })
        .map_err(|_| DriverError::Closed)?;
    response.recv().map_err(|_| DriverError::Closed)?
}

fn dispatch_loop<T: Transport>(
    mut transport: T,
    mut plugin: Box<dyn PluginProcess>,
    queue: &Receiver<RpcCall>,
) {
    let mut next_id = 0_u64;
    for call in queue {
        next_id += 1;
        if call.method == Method::Close {
            let stopped = plugin.close();
            let outcome = exchange(&mut transport, next_id, call.method, call.params)
                .and_then(|value| stopped.map(|()| value));
            plugin.terminate(DEFAULT_EXIT_GRACE);
            drop(call.reply.send(outcome));
            debug!(target: BRIDGE_TARGET, "plugin session closed");
            return;
        }
        let outcome = exchange(&mut transport, next_id, call.method, call.params);
        drop(call.reply.send(outcome));
    }
}

fn exchange<T: Transport>(
    transport: &mut T,
    id: u64,
    method: Method,
    params: Value,
) -> DriverResult<Value> {
    let request = RpcRequest::new(id, method, params);
    transport.round_trip(&request)?.into_result(method)
}

impl Driver for RpcBridge {
    fn driver_name(&self) -> DriverResult<String> {
        self.call_as(Method::DriverName, Value::Null)
    }

    fn machine_name(&self) -> DriverResult<String> {
        self.call_as(Method::GetMachineName, Value::Null)
    }

    fn create_flags(&self) -> DriverResult<Vec<FlagDescriptor>> {
        self.call_as(Method::GetCreateFlags, Value::Null)
    }

    fn set_config_from_flags(&mut self, options: &DriverOptions) -> DriverResult<()> {
        self.call(Method::SetConfigFromFlags, encode_value(options)?)
            .map(drop)
    }

    fn config_raw(&self) -> DriverResult<Vec<u8>> {
        let document: String = self.call_as(Method::GetConfigRaw, Value::Null)?;
        Ok(document.into_bytes())
    }

    fn set_config_raw(&mut self, data: &[u8]) -> DriverResult<()> {
        let document = std::str::from_utf8(data)
            .map_err(|err| DriverError::protocol(format!("configuration is not UTF-8: {err}")))?;
        self.call(Method::SetConfigRaw, Value::String(document.to_owned()))
            .map(drop)
    }

    fn state(&self) -> DriverResult<MachineState> {
        self.call_as(Method::GetState, Value::Null)
    }

    fn url(&self) -> DriverResult<String> {
        self.call_as(Method::GetUrl, Value::Null)
    }

    fn ip(&self) -> DriverResult<String> {
        self.call_as(Method::GetIp, Value::Null)
    }

    fn ssh_hostname(&self) -> DriverResult<String> {
        self.call_as(Method::GetSshHostname, Value::Null)
    }

    fn ssh_port(&self) -> DriverResult<u16> {
        self.call_as(Method::GetSshPort, Value::Null)
    }

    fn ssh_username(&self) -> DriverResult<String> {
        self.call_as(Method::GetSshUsername, Value::Null)
    }

    fn ssh_key_path(&self) -> DriverResult<String> {
        self.call_as(Method::GetSshKeyPath, Value::Null)
    }

    fn local_artifact_path(&self, file: &str) -> DriverResult<String> {
        self.call_as(Method::LocalArtifactPath, Value::String(file.to_owned()))
    }

    fn global_artifact_path(&self) -> DriverResult<String> {
        self.call_as(Method::GlobalArtifactPath, Value::Null)
    }

    fn pre_create_check(&mut self) -> DriverResult<()> {
        self.invoke(Method::PreCreateCheck)
    }

    fn create(&mut self) -> DriverResult<()> {
        self.invoke(Method::Create)
    }

    fn remove(&mut self) -> DriverResult<()> {
        self.invoke(Method::Remove)
    }

    fn start(&mut self) -> DriverResult<()> {
        self.invoke(Method::Start)
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.invoke(Method::Stop)
    }

    fn restart(&mut self) -> DriverResult<()> {
        self.invoke(Method::Restart)
    }

    fn kill(&mut self) -> DriverResult<()> {
        self.invoke(Method::Kill)
    }

    fn upgrade(&mut self) -> DriverResult<()> {
        self.invoke(Method::Upgrade)
    }
}

#[cfg(test)]
mod tests;
