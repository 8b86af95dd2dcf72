//! Plugin executable discovery, spawning, and the address handshake.
//!
//! A driver named `virtualbox` lives in an executable named
//! `drover-driver-virtualbox`. The launcher finds it in the configured plugin
//! directory or on `PATH`, starts it, and waits for the first line on its
//! standard output, which must be the `host:port` the plugin listens on.
//! Everything the plugin writes afterwards, on either stream, is logged at
//! debug level.

use std::env;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};

/// Tracing target for launcher operations.
const LAUNCHER_TARGET: &str = "drover_plugins::launcher";

/// Executable name prefix used when none is configured.
pub const DEFAULT_EXECUTABLE_PREFIX: &str = "drover-driver-";

/// How long a plugin may take to announce its address.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closed plugin may take to exit before it is killed.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(500);

const EXIT_POLL: Duration = Duration::from_millis(10);

/// A running plugin whose endpoint can be discovered.
pub trait PluginProcess: Send {
    /// Returns the endpoint the plugin listens on.
    ///
    /// The first call may block until the handshake completes; the outcome,
    /// success or failure, is cached for later calls.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::HandshakeTimeout`] or
    /// [`DriverError::Handshake`] if the plugin never announced a usable
    /// address.
    fn address(&mut self) -> DriverResult<String>;

    /// Stops diagnostic logging for the plugin.
    ///
    /// Does not wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Implementations may report teardown failures.
    fn close(&mut self) -> DriverResult<()>;

    /// Waits up to `grace` for the process to exit, then kills and reaps it.
    ///
    /// Handles that own no child process have nothing to do.
    fn terminate(&mut self, _grace: Duration) {}
}

/// Locates and starts plugin executables.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use drover_plugins::PluginLauncher;
///
/// let launcher = PluginLauncher::new()
///     .with_search_dir("/opt/drover/plugins")
///     .with_handshake_timeout(Duration::from_secs(2));
/// assert_eq!(launcher.executable_name("fake"), "drover-driver-fake");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLauncher {
    prefix: String,
    search_dir: Option<PathBuf>,
    handshake_timeout: Duration,
}

impl Default for PluginLauncher {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_EXECUTABLE_PREFIX.to_owned(),
            search_dir: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl PluginLauncher {
    /// Creates a launcher with the default prefix and timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the executable name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Searches `dir` before `PATH`.
    #[must_use]
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = Some(dir.into());
        self
    }

    /// Overrides the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Executable name prefix.
    #[must_use]
    pub const fn prefix(&self) -> &str {
        self.prefix.as_str()
    }

    /// Handshake timeout applied to launched plugins.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Executable name for `driver`.
    #[must_use]
    pub fn executable_name(&self, driver: &str) -> String {
        format!("{}{driver}", self.prefix)
    }

    /// Finds the executable for `driver`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if no candidate file exists.
    pub fn locate(&self, driver: &str) -> DriverResult<PathBuf> {
        let executable = self.executable_name(driver);
        let path_dirs = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();

        let found = self
            .search_dir
            .iter()
            .chain(path_dirs.iter())
            .map(|dir| dir.join(&executable))
            .find(|candidate| candidate.is_file());
        found.ok_or(DriverError::NotFound {
            name: driver.to_owned(),
            executable,
        })
    }

    /// Locates and starts the plugin for `driver`.
    ///
    /// The handshake is not awaited here; call
    /// [`PluginProcess::address`] on the result.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] or [`DriverError::SpawnFailed`].
    pub fn launch(&self, driver: &str) -> DriverResult<LocalBinaryPlugin> {
        let executable = self.locate(driver)?;
        debug!(
            target: LAUNCHER_TARGET,
            driver,
            executable = %executable.display(),
            "found plugin executable"
        );
        LocalBinaryPlugin::spawn(driver, &executable, self.handshake_timeout)
    }
}

/// First stdout line, or the reason there was none.
type HandshakeLine = Result<String, String>;

/// A plugin executable running as a child process.
#[derive(Debug)]
pub struct LocalBinaryPlugin {
    name: String,
    executable: PathBuf,
    child: Child,
    handshake: Option<Receiver<HandshakeLine>>,
    address: Option<DriverResult<String>>,
    timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl LocalBinaryPlugin {
    /// Starts `executable` and begins draining its output.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::SpawnFailed`] if the process cannot be started.
    pub fn spawn(name: &str, executable: &Path, timeout: Duration) -> DriverResult<Self> {
        let spawn_failed = |err| DriverError::SpawnFailed {
            name: name.to_owned(),
            source: Arc::new(err),
        };

        let mut child = Command::new(executable)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_failed)?;

        debug!(
            target: LAUNCHER_TARGET,
            driver = name,
            pid = child.id(),
            "launched plugin process"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let (announce, handshake) = mpsc::channel();

        if let Some(stdout) = child.stdout.take() {
            let plugin = name.to_owned();
            let flag = Arc::clone(&stop);
            thread::spawn(move || read_stdout(&plugin, stdout, &announce, &flag));
        }
        if let Some(stderr) = child.stderr.take() {
            let plugin = name.to_owned();
            let flag = Arc::clone(&stop);
            thread::spawn(move || drain(&plugin, "stderr", BufReader::new(stderr), &flag));
        }

        Ok(Self {
            name: name.to_owned(),
            executable: executable.to_path_buf(),
            child,
            handshake: Some(handshake),
            address: None,
            timeout,
            stop,
        })
    }

    /// Driver name the plugin was launched for.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Operating system process id of the plugin.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Path of the running executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn await_handshake(&mut self) -> DriverResult<String> {
        let Some(handshake) = self.handshake.take() else {
            return Err(self.handshake_error("handshake already consumed"));
        };
        match handshake.recv_timeout(self.timeout) {
            Ok(Ok(line)) => parse_address(&self.name, &line),
            Ok(Err(message)) => Err(self.handshake_error(message)),
            Err(RecvTimeoutError::Timeout) => Err(DriverError::HandshakeTimeout {
                name: self.name.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.handshake_error("plugin output closed before announcing an address"))
            }
        }
    }

    fn handshake_error(&self, message: impl Into<String>) -> DriverError {
        DriverError::Handshake {
            name: self.name.clone(),
            message: message.into(),
        }
    }

    fn exited_within(&mut self, grace: Duration) -> bool {
        let started = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: LAUNCHER_TARGET, driver = %self.name, ?status, "plugin process exited");
                    return true;
                }
                Ok(None) if started.elapsed() < grace => thread::sleep(EXIT_POLL),
                Ok(None) => return false,
                Err(err) => {
                    warn!(target: LAUNCHER_TARGET, driver = %self.name, %err, "cannot query plugin process");
                    return false;
                }
            }
        }
    }
}

impl PluginProcess for LocalBinaryPlugin {
    fn address(&mut self) -> DriverResult<String> {
        if let Some(outcome) = &self.address {
            return outcome.clone();
        }
        let outcome = self.await_handshake();
        match &outcome {
            Ok(address) => debug!(
                target: LAUNCHER_TARGET,
                driver = %self.name,
                address = %address,
                "plugin server listening"
            ),
            Err(err) => {
                warn!(
                    target: LAUNCHER_TARGET,
                    driver = %self.name,
                    error = %err,
                    "plugin handshake failed, killing process"
                );
                self.terminate(Duration::ZERO);
            }
        }
        self.address = Some(outcome.clone());
        outcome
    }

    fn close(&mut self) -> DriverResult<()> {
        self.stop.store(true, Ordering::Relaxed);
        debug!(target: LAUNCHER_TARGET, driver = %self.name, "closing plugin output");
        Ok(())
    }

    fn terminate(&mut self, grace: Duration) {
        self.stop.store(true, Ordering::Relaxed);
        if self.exited_within(grace) {
            return;
        }
        if let Err(err) = self.child.kill() {
            debug!(target: LAUNCHER_TARGET, driver = %self.name, %err, "plugin already exited");
        }
        match self.child.wait() {
            Ok(status) => debug!(target: LAUNCHER_TARGET, driver = %self.name, ?status, "plugin process killed"),
            Err(err) => warn!(target: LAUNCHER_TARGET, driver = %self.name, %err, "cannot reap plugin process"),
        }
    }
}

impl Drop for LocalBinaryPlugin {
    fn drop(&mut self) {
        self.terminate(Duration::ZERO);
    }
}

fn parse_address(name: &str, line: &str) -> DriverResult<String> {
    let address = line.trim();
    let invalid = || DriverError::Handshake {
        name: name.to_owned(),
        message: format!("expected host:port, got '{address}'"),
    };
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(address.to_owned())
}

fn read_stdout(name: &str, stdout: impl Read, announce: &Sender<HandshakeLine>, stop: &AtomicBool) {
    let mut reader = BufReader::new(stdout);
    let mut first = String::new();
    let handshake = match reader.read_line(&mut first) {
        Ok(0) => Err(String::from("plugin exited without announcing an address")),
        Ok(_) => Ok(first),
        Err(err) => Err(format!("reading plugin address: {err}")),
    };
    let failed = handshake.is_err();
    drop(announce.send(handshake));
    if !failed {
        drain(name, "stdout", reader, stop);
    }
}

fn drain(name: &str, stream: &str, reader: impl BufRead, stop: &AtomicBool) {
    for line in reader.lines() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match line {
            Ok(text) => debug!(
                target: LAUNCHER_TARGET,
                driver = name,
                stream,
                line = %text.trim_end(),
                "plugin output"
            ),
            Err(err) => {
                warn!(target: LAUNCHER_TARGET, driver = name, stream, %err, "error reading plugin output");
                break;
            }
        }
    }
}
