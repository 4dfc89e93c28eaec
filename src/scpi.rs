//! SCPI command vocabulary of the electronic load.
//!
//! Every setter is sent without waiting for the acknowledgement and then
//! confirmed with the matching query. A setpoint the instrument does not echo
//! back verbatim is an error; the control loop never runs on an unconfirmed
//! setpoint.

use crate::channel::ScpiChannel;
use crate::constants::*;
use crate::error::{LoadError, Result};

/// Format `value` with a fixed number of decimals followed by its unit
pub fn format_quantity(value: f64, decimals: usize, unit: &str) -> String {
    format!("{:.*}{}", decimals, value, unit)
}

/// Strip the unit suffix from a reply like `3.912V` and parse the number
pub fn parse_quantity(reply: &str, unit: &str) -> Result<f64> {
    let trimmed = reply.trim();
    let number = trimmed.strip_suffix(unit).unwrap_or(trimmed).trim();
    number
        .parse::<f64>()
        .map_err(|e| LoadError::Parse(format!("{:?} is not a value in {}: {}", reply, unit, e)))
}

/// High-level operations on an electronic load
pub trait ElectronicLoad {
    /// Switch the load input on and confirm it
    fn enable_input(&self) -> Result<()>;

    /// Switch the load input off and confirm it
    fn disable_input(&self) -> Result<()>;

    fn is_input_enabled(&self) -> Result<bool>;

    /// Enter constant-voltage mode at `volts`
    fn set_constant_voltage(&self, volts: f64) -> Result<()>;

    /// Enter constant-current mode at `amps`
    fn set_constant_current(&self, amps: f64) -> Result<()>;

    fn measured_current(&self) -> Result<f64>;

    fn measured_voltage(&self) -> Result<f64>;
}

/// Send `command` without waiting, then require `query` to answer `expected`
fn set_and_verify<C: ScpiChannel + ?Sized>(
    channel: &C,
    command: &str,
    query: &str,
    expected: &str,
) -> Result<()> {
    channel.rpc(command, 0)?;
    let actual = channel.query(query)?;
    if actual != expected {
        return Err(LoadError::VerificationFailed {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

impl<C: ScpiChannel + ?Sized> ElectronicLoad for C {
    fn enable_input(&self) -> Result<()> {
        set_and_verify(self, ":INPut ON", ":INPut?", INPUT_ON)
    }

    fn disable_input(&self) -> Result<()> {
        set_and_verify(self, ":INPut OFF", ":INPut?", INPUT_OFF)
    }

    fn is_input_enabled(&self) -> Result<bool> {
        match self.query(":INPut?")?.as_str() {
            INPUT_ON => Ok(true),
            INPUT_OFF => Ok(false),
            other => Err(LoadError::InvalidResponse {
                expected: format!("{} or {}", INPUT_ON, INPUT_OFF),
                actual: other.to_string(),
            }),
        }
    }

    fn set_constant_voltage(&self, volts: f64) -> Result<()> {
        let value = format_quantity(volts, VOLTAGE_DECIMALS, "V");
        set_and_verify(self, &format!(":VOLT {}", value), ":VOLT?", &value)
    }

    fn set_constant_current(&self, amps: f64) -> Result<()> {
        let value = format_quantity(amps, CURRENT_DECIMALS, "A");
        set_and_verify(self, &format!(":CURR {}", value), ":CURR?", &value)
    }

    fn measured_current(&self) -> Result<f64> {
        parse_quantity(&self.query(":MEASure:CURRent?")?, "A")
    }

    fn measured_voltage(&self) -> Result<f64> {
        parse_quantity(&self.query(":MEASure:VOLTage?")?, "V")
    }
}
