//! Protocol constants for the electronic load link.
//!
//! This module defines the constants used by the UDP SCPI channel,
//! including timing parameters, reply formatting and the default test
//! configuration.

/// Line terminator appended to every outbound command
pub const LINE_TERMINATOR: &str = "\n";

/// Largest datagram accepted from the instrument
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Receive poll timeout in milliseconds (bounds how fast `stop()` is observed)
pub const RECV_POLL_TIMEOUT_MS: u64 = 100;

/// Time a single RPC attempt waits for its replies
pub const RPC_TIMEOUT_MS: u64 = 500;

/// Number of attempts before an RPC is declared lost
pub const RPC_RETRY_COUNT: u32 = 10;

/// Decimal places used when sending/verifying a voltage setpoint
pub const VOLTAGE_DECIMALS: usize = 3;

/// Decimal places used when sending/verifying a current setpoint
pub const CURRENT_DECIMALS: usize = 4;

/// Reply of `:INPut?` when the load is sinking current
pub const INPUT_ON: &str = "ON";

/// Reply of `:INPut?` when the load is disconnected
pub const INPUT_OFF: &str = "OFF";

/// Default instrument address
pub const DEFAULT_REMOTE: &str = "192.168.1.17:18190";

/// Default local UDP port replies are received on
pub const DEFAULT_LOCAL_PORT: u16 = 18190;

/// Default constant-voltage threshold in volts
pub const DEFAULT_DISCHARGE_VOLTAGE: f64 = 3.7;

/// Default constant-current setpoint in amps
pub const DEFAULT_DISCHARGE_CURRENT: f64 = 1.0;

/// Default time limit in seconds
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 3600;

/// Default cutoff current in amps (50mA)
pub const DEFAULT_CUTOFF_CURRENT: f64 = 0.05;

/// Default polling interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default monitor print interval in milliseconds
pub const MONITOR_INTERVAL_MS: u64 = 5000;
