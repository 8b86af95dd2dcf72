//! Plugin-side adapter exposing a concrete driver over the wire.
//!
//! An [`RpcServer`] decodes each request, dispatches it to the wrapped
//! driver, and encodes the outcome. Every delegated call runs inside
//! `catch_unwind`: a panicking backend fails that one call and later calls
//! are served normally. `Close` is answered without touching the driver and
//! then ends [`RpcServer::serve`], which lets the plugin process exit.

use std::any::Any;
use std::env;
use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::flags::DriverOptions;
use crate::launcher::DEFAULT_EXECUTABLE_PREFIX;
use crate::protocol::{
    Method, PROTOCOL_VERSION, RpcRequest, RpcResponse, decode_line, decode_value, encode_line,
    encode_value,
};
use crate::registry::DriverRegistry;

/// Tracing target for server operations.
const SERVER_TARGET: &str = "drover_plugins::server";

/// Serves one driver to any number of connections.
#[derive(Debug)]
pub struct RpcServer<D> {
    driver: Mutex<D>,
}

impl<D: Driver> RpcServer<D> {
    /// Wraps `driver`.
    #[must_use]
    pub const fn new(driver: D) -> Self {
        Self {
            driver: Mutex::new(driver),
        }
    }

    /// Answers one request.
    #[must_use]
    pub fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id();
        let outcome = request
            .method()
            .and_then(|method| self.dispatch(method, request.into_params()));
        match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(err) => {
                debug!(target: SERVER_TARGET, id, error = %err, "call failed");
                RpcResponse::failure(id, err.to_string())
            }
        }
    }

    fn dispatch(&self, method: Method, params: Value) -> DriverResult<Value> {
        match method {
            Method::Close => Ok(Value::Null),
            Method::GetVersion => Ok(Value::from(PROTOCOL_VERSION)),
            _ => self.delegate(method, params),
        }
    }

    fn delegate(&self, method: Method, params: Value) -> DriverResult<Value> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
            invoke(&mut *driver, method, params)
        }));
        outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(target: SERVER_TARGET, method = %method, panic = %message, "driver panicked");
            Err(DriverError::backend(format!("panic in {method}: {message}")))
        })
    }

    /// Serves requests from one connection until it ends.
    ///
    /// Returns `true` if the peer asked the plugin to close.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if the connection fails.
    pub fn serve_connection(&self, stream: TcpStream) -> DriverResult<bool> {
        let mut writer = stream
            .try_clone()
            .map_err(|err| DriverError::io("cloning client connection", err))?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|err| DriverError::io("reading request", err))?;
            if read == 0 {
                return Ok(false);
            }

            let (response, closing) = match decode_line::<RpcRequest>(&line) {
                Ok(request) => {
                    let closing = matches!(request.method(), Ok(Method::Close));
                    (self.handle(request), closing)
                }
                Err(err) => (RpcResponse::failure(0, err.to_string()), false),
            };

            let encoded = encode_line(&response)?;
            writer
                .write_all(encoded.as_bytes())
                .and_then(|()| writer.flush())
                .map_err(|err| DriverError::io("writing reply", err))?;
            if closing {
                return Ok(true);
            }
        }
    }
}

impl<D: Driver + 'static> RpcServer<D> {
    /// Accepts connections until a client sends `Close`.
    ///
    /// Each connection is served on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if the accept thread cannot be started.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> DriverResult<()> {
        let (shutdown, closed) = mpsc::channel();
        thread::Builder::new()
            .name(String::from("drover-plugin-accept"))
            .spawn(move || accept_loop(&self, &listener, &shutdown))
            .map_err(|err| DriverError::io("starting accept thread", err))?;
        let requested = await_close(&closed);
        info!(target: SERVER_TARGET, requested, "plugin server shutting down");
        Ok(())
    }
}

/// Blocks until a connection asks the plugin to close.
///
/// Returns `false` when every sender is gone first, which happens only if
/// the accept thread died.
#[must_use]
fn await_close(closed: &Receiver<()>) -> bool {
    if closed.recv().is_ok() {
        return true;
    }
    warn!(target: SERVER_TARGET, "accept thread ended without a close request");
    false
}

fn accept_loop<D: Driver + 'static>(
    server: &Arc<RpcServer<D>>,
    listener: &TcpListener,
    shutdown: &Sender<()>,
) {
    for stream in listener.incoming() {
        match stream {
            Ok(connection) => {
                let handler = Arc::clone(server);
                let notify = shutdown.clone();
                thread::spawn(move || match handler.serve_connection(connection) {
                    Ok(true) => drop(notify.send(())),
                    Ok(false) => debug!(target: SERVER_TARGET, "client disconnected"),
                    Err(err) => warn!(target: SERVER_TARGET, error = %err, "connection failed"),
                });
            }
            Err(err) => warn!(target: SERVER_TARGET, error = %err, "accept failed"),
        }
    }
}

fn invoke<D: Driver + ?Sized>(driver: &mut D, method: Method, params: Value) -> DriverResult<Value> {
    match method {
        Method::Close | Method::GetVersion => Err(DriverError::protocol(format!(
            "{method} is answered by the server"
        ))),
        Method::GetCreateFlags => encode_value(&driver.create_flags()?),
        Method::SetConfigRaw => {
            let document: String = decode_value(params)?;
            driver.set_config_raw(document.as_bytes()).map(|()| Value::Null)
        }
        Method::GetConfigRaw => {
            let document = String::from_utf8(driver.config_raw()?)
                .map_err(|err| DriverError::protocol(format!("configuration is not UTF-8: {err}")))?;
            Ok(Value::String(document))
        }
        Method::DriverName => driver.driver_name().map(Value::from),
        Method::SetConfigFromFlags => {
            let options: DriverOptions = decode_value(params)?;
            driver.set_config_from_flags(&options).map(|()| Value::Null)
        }
        Method::GetUrl => driver.url().map(Value::from),
        Method::GetMachineName => driver.machine_name().map(Value::from),
        Method::GetIp => driver.ip().map(Value::from),
        Method::GetSshHostname => driver.ssh_hostname().map(Value::from),
        Method::GetSshKeyPath => driver.ssh_key_path().map(Value::from),
        Method::GetSshPort => driver.ssh_port().map(Value::from),
        Method::GetSshUsername => driver.ssh_username().map(Value::from),
        Method::GetState => encode_value(&driver.state()?),
        Method::PreCreateCheck => driver.pre_create_check().map(|()| Value::Null),
        Method::Create => driver.create().map(|()| Value::Null),
        Method::Remove => driver.remove().map(|()| Value::Null),
        Method::Start => driver.start().map(|()| Value::Null),
        Method::Stop => driver.stop().map(|()| Value::Null),
        Method::Restart => driver.restart().map(|()| Value::Null),
        Method::Kill => driver.kill().map(|()| Value::Null),
        Method::Upgrade => driver.upgrade().map(|()| Value::Null),
        Method::LocalArtifactPath => {
            let file: String = decode_value(params)?;
            driver.local_artifact_path(&file).map(Value::from)
        }
        Method::GlobalArtifactPath => driver.global_artifact_path().map(Value::from),
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

/// Writes the listening address as the handshake line.
///
/// # Errors
///
/// Returns [`DriverError::Io`] if the address cannot be read or written.
pub fn announce<W: Write>(listener: &TcpListener, out: &mut W) -> DriverResult<SocketAddr> {
    let address = listener
        .local_addr()
        .map_err(|err| DriverError::io("reading listener address", err))?;
    writeln!(out, "{address}")
        .and_then(|()| out.flush())
        .map_err(|err| DriverError::io("announcing plugin address", err))?;
    Ok(address)
}

/// Entry point for a plugin executable serving `driver`.
///
/// Binds an ephemeral loopback port, announces it on standard output, and
/// serves until a client sends `Close`. Nothing else may be written to
/// standard output.
///
/// # Errors
///
/// Returns [`DriverError::Io`] if the listener cannot be set up.
pub fn run_plugin<D: Driver + 'static>(driver: D) -> DriverResult<()> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|err| DriverError::io("binding plugin listener", err))?;
    let address = announce(&listener, &mut io::stdout().lock())?;
    info!(target: SERVER_TARGET, %address, "plugin server listening");
    Arc::new(RpcServer::new(driver)).serve(listener)
}

/// Entry point for a plugin executable hosting several drivers.
///
/// The driver is chosen by the name the executable was invoked as, with
/// [`DEFAULT_EXECUTABLE_PREFIX`] stripped.
///
/// # Errors
///
/// Returns [`DriverError::UnknownDriver`] if the name is not registered, or
/// any error from [`run_plugin`].
pub fn run_registered(registry: &DriverRegistry) -> DriverResult<()> {
    let invoked = env::args_os()
        .next()
        .map(PathBuf::from)
        .map_or_else(env::current_exe, Ok)
        .map_err(|err| DriverError::io("resolving plugin executable", err))?;
    let name = executable_stem(&invoked).ok_or_else(|| {
        DriverError::protocol(format!(
            "cannot derive a driver name from '{}'",
            invoked.display()
        ))
    })?;
    let driver = registry.for_executable(name, DEFAULT_EXECUTABLE_PREFIX)?;
    run_plugin(driver)
}

fn executable_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(OsStr::to_str)
}
