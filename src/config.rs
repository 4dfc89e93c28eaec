//! Test configuration.
//!
//! Values come from built-in defaults, optionally overlaid by a TOML file
//! whose keys mirror the field names below:
//!
//! ```toml
//! remote = "192.168.1.17:18190"
//! local_port = 18190
//! discharge_voltage = 2.75
//! discharge_current = 1.0
//! time_limit_secs = 7200
//! cutoff_current = 0.05
//! ```

use crate::constants::*;
use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Instrument address as `host:port`
    pub remote: String,
    /// Local UDP port the instrument replies to
    pub local_port: u16,
    /// CV threshold in volts
    pub discharge_voltage: f64,
    /// CC setpoint in amps
    pub discharge_current: f64,
    pub time_limit_secs: u64,
    /// Current in amps below which the test is complete
    pub cutoff_current: f64,
    /// Capacity already drawn in mAh, when resuming a test
    pub initial_capacity_mah: f64,
    pub interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub rpc_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            discharge_voltage: DEFAULT_DISCHARGE_VOLTAGE,
            discharge_current: DEFAULT_DISCHARGE_CURRENT,
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            cutoff_current: DEFAULT_CUTOFF_CURRENT,
            initial_capacity_mah: 0.0,
            interval_ms: DEFAULT_INTERVAL_MS,
            rpc_timeout_ms: RPC_TIMEOUT_MS,
            rpc_retries: RPC_RETRY_COUNT,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LoadError::Config(e.to_string()))
    }

    /// Read a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Resolve `remote` to a socket address
    pub fn remote_addr(&self) -> Result<SocketAddr> {
        self.remote
            .to_socket_addrs()
            .map_err(|e| LoadError::Config(format!("remote {:?}: {}", self.remote, e)))?
            .next()
            .ok_or_else(|| {
                LoadError::Config(format!("remote {:?} resolves to nothing", self.remote))
            })
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Err(LoadError::Config(what.to_string()));

        if !(self.discharge_voltage.is_finite() && self.discharge_voltage >= 0.0) {
            return invalid("discharge_voltage must be a non-negative number");
        }
        if !(self.discharge_current.is_finite() && self.discharge_current > 0.0) {
            return invalid("discharge_current must be positive");
        }
        if !(self.cutoff_current.is_finite() && self.cutoff_current >= 0.0) {
            return invalid("cutoff_current must be a non-negative number");
        }
        if !(self.initial_capacity_mah.is_finite() && self.initial_capacity_mah >= 0.0) {
            return invalid("initial_capacity_mah must be a non-negative number");
        }
        if self.interval_ms == 0 {
            return invalid("interval_ms must be greater than zero");
        }
        if self.rpc_timeout_ms == 0 {
            return invalid("rpc_timeout_ms must be greater than zero");
        }
        if self.rpc_retries == 0 {
            return invalid("rpc_retries must be at least 1");
        }
        self.remote_addr()?;
        Ok(())
    }
}
