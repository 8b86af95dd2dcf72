//! Bridges opened during one session, closed together at its end.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::bridge::{BridgeCloser, RpcBridge};
use crate::error::{DriverError, DriverResult};
use crate::launcher::PluginLauncher;

const POOL_TARGET: &str = "drover_plugins::pool";

/// Launches one plugin process per bridge and remembers how to close it.
#[derive(Debug, Default)]
pub struct PluginPool {
    launcher: PluginLauncher,
    closers: Mutex<Vec<BridgeCloser>>,
}

impl PluginPool {
    /// Creates a pool that launches plugins with `launcher`.
    #[must_use]
    pub fn new(launcher: PluginLauncher) -> Self {
        Self {
            launcher,
            closers: Mutex::new(Vec::new()),
        }
    }

    /// Launcher used for new plugins.
    #[must_use]
    pub const fn launcher(&self) -> &PluginLauncher {
        &self.launcher
    }

    /// Starts a plugin for `driver` and connects a bridge to it.
    ///
    /// # Errors
    ///
    /// Returns any launch, handshake, connection, or configuration error.
    pub fn open(&self, driver: &str, raw_config: &[u8]) -> DriverResult<RpcBridge> {
        let plugin = self.launcher.launch(driver)?;
        let bridge = RpcBridge::connect(plugin, raw_config)?;
        self.track(&bridge);
        debug!(target: POOL_TARGET, driver, "opened plugin bridge");
        Ok(bridge)
    }

    /// Registers a bridge to be closed by [`PluginPool::shutdown`].
    pub fn track(&self, bridge: &RpcBridge) {
        self.lock_closers().push(bridge.closer());
    }

    /// Number of bridges awaiting shutdown.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.lock_closers().len()
    }

    /// Closes every tracked bridge, returning how many were still open.
    ///
    /// Bridges already closed by their owners are skipped silently; other
    /// failures are logged.
    pub fn shutdown(&self) -> usize {
        let closers: Vec<BridgeCloser> = self.lock_closers().drain(..).collect();
        let mut closed = 0;
        for closer in closers {
            match closer.close() {
                Ok(()) => closed += 1,
                Err(DriverError::Closed) => {}
                Err(err) => warn!(target: POOL_TARGET, error = %err, "failed to close plugin"),
            }
        }
        debug!(target: POOL_TARGET, closed, "plugin pool shut down");
        closed
    }

    fn lock_closers(&self) -> MutexGuard<'_, Vec<BridgeCloser>> {
        self.closers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PluginPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
