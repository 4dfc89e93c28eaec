use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Load operating mode during a discharge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Holding the discharge current fixed
    #[serde(rename = "CC")]
    ConstantCurrent,
    /// Holding the terminal voltage at the discharge threshold
    #[serde(rename = "CV")]
    ConstantVoltage,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ConstantCurrent => write!(f, "CC"),
            Mode::ConstantVoltage => write!(f, "CV"),
        }
    }
}

/// Why a discharge test left its control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The load input was switched off by someone else
    InputDisabled,
    /// A shutdown was requested through the stop token
    ShutdownRequested,
    /// The configured time limit elapsed
    TimeLimit,
    /// Measured current fell below the cutoff; the normal end of a test
    CutoffReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::InputDisabled => "external interruption",
            StopReason::ShutdownRequested => "graceful shutdown requested",
            StopReason::TimeLimit => "time limit reached",
            StopReason::CutoffReached => "cutoff reached",
        };
        f.write_str(text)
    }
}

/// One polled measurement pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub voltage: f64,
    pub current: f64,
}

/// Summary of a finished discharge test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    pub final_mode: Mode,
    /// Samples integrated into the capacity sum
    pub samples: u64,
    pub capacity_mah: f64,
    pub last_sample: Option<Sample>,
}

impl DischargeReport {
    /// Wall-clock duration of the test
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
