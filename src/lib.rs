//! # Battery Capacity Tester
//!
//! A Rust library for measuring battery capacity with a programmable
//! electronic load controlled over UDP SCPI.
//!
//! ## Features
//!
//! - UDP request/response channel with per-request retries over a lossy link
//! - Typed SCPI operations for the load (CC/CV setpoints, input, measurements)
//! - Discharge control loop: CC discharge, switch to CV near the target
//!   voltage, capacity integration, stop on cutoff current or time limit
//! - Load input always switched off when a test ends, however it ends
//!
//! ## Example
//!
//! ```no_run
//! use battery_capacity_tester::{Config, DischargeTest, Limits, StopToken, UdpScpiChannel};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let mut channel = UdpScpiChannel::new(config.remote_addr()?, config.local_port);
//!     channel.start()?;
//!
//!     let report = DischargeTest::new(channel, Limits::from(&config), StopToken::new()).run()?;
//!     println!("Capacity: {:.1}mAh ({})", report.capacity_mah, report.stop_reason);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod constants;
pub mod discharge;
pub mod error;
pub mod scpi;
pub mod transport;
pub mod types;

pub use channel::{ScpiChannel, UdpScpiChannel};
pub use config::Config;
pub use discharge::{DischargeTest, Limits, StopToken};
pub use error::{LoadError, Result};
pub use scpi::ElectronicLoad;
pub use types::*;
