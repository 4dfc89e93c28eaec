//! Battery discharge control loop.
//!
//! The test starts the load in constant-current mode, polls current and
//! voltage at a fixed interval and sums the drawn charge. Once the voltage
//! sags below the discharge threshold the load is switched to
//! constant-voltage mode, which it never leaves. The loop ends when the
//! input is switched off externally, a stop is requested, the time limit
//! passes or the current drops under the cutoff. Whatever ends the loop,
//! including a failed command, the load input is switched off afterwards.

use crate::channel::ScpiChannel;
use crate::config::Config;
use crate::error::Result;
use crate::scpi::ElectronicLoad;
use crate::types::{DischargeReport, Mode, Sample, StopReason};
use chrono::Utc;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Time source for the control loop
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock with a blocking sleep
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Cancellation flag shared between a shutdown trigger and the control loop
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the control loop to finish after its current sample
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Setpoints and termination thresholds of one test
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Voltage at which the load switches to CV (volts)
    pub discharge_voltage: f64,
    /// CC setpoint (amps)
    pub discharge_current: f64,
    /// Current below which the battery counts as empty (amps)
    pub cutoff_current: f64,
    pub time_limit: Duration,
    /// Capacity already drawn before this run, for resumed tests
    pub initial_capacity_mah: f64,
    /// Polling interval
    pub interval: Duration,
}

impl From<&Config> for Limits {
    fn from(config: &Config) -> Self {
        Self {
            discharge_voltage: config.discharge_voltage,
            discharge_current: config.discharge_current,
            cutoff_current: config.cutoff_current,
            time_limit: config.time_limit(),
            initial_capacity_mah: config.initial_capacity_mah,
            interval: config.interval(),
        }
    }
}

/// Charge drawn at `current_amps` over `elapsed`, in mAh.
///
/// Left-rectangle rule: the sample's current is taken as constant over the
/// whole preceding interval. Resolution is one millisecond.
pub fn milliamp_hours(current_amps: f64, elapsed: Duration) -> f64 {
    let hours = elapsed.as_millis() as f64 / 1000.0 / 3600.0;
    current_amps * 1000.0 * hours
}

/// Mode and accumulated capacity of a running test
#[derive(Debug, Clone, PartialEq)]
pub struct DischargeState {
    mode: Mode,
    capacity_mah: f64,
    samples: u64,
}

impl DischargeState {
    pub fn new(initial_capacity_mah: f64) -> Self {
        Self {
            mode: Mode::ConstantCurrent,
            capacity_mah: initial_capacity_mah,
            samples: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn capacity_mah(&self) -> f64 {
        self.capacity_mah
    }

    /// Number of samples integrated so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// True exactly once: the first time `voltage` is under `threshold` in CC
    pub fn needs_constant_voltage(&self, voltage: f64, threshold: f64) -> bool {
        self.mode == Mode::ConstantCurrent && voltage < threshold
    }

    pub fn enter_constant_voltage(&mut self) {
        self.mode = Mode::ConstantVoltage;
    }

    /// Add one sample to the capacity sum and return its increment
    pub fn integrate(&mut self, current_amps: f64, elapsed: Duration) -> f64 {
        let delta = milliamp_hours(current_amps, elapsed);
        self.capacity_mah += delta;
        self.samples += 1;
        delta
    }
}

/// One battery discharge run against an electronic load
pub struct DischargeTest<C, K = SystemClock> {
    channel: C,
    limits: Limits,
    clock: K,
    stop: StopToken,
    completion: Option<oneshot::Sender<()>>,
}

impl<C: ScpiChannel> DischargeTest<C> {
    pub fn new(channel: C, limits: Limits, stop: StopToken) -> Self {
        Self {
            channel,
            limits,
            clock: SystemClock,
            stop,
            completion: None,
        }
    }
}

impl<C: ScpiChannel, K: Clock> DischargeTest<C, K> {
    /// Replace the time source
    pub fn with_clock<T: Clock>(self, clock: T) -> DischargeTest<C, T> {
        DischargeTest {
            channel: self.channel,
            limits: self.limits,
            clock,
            stop: self.stop,
            completion: self.completion,
        }
    }

    /// Signal `done` once cleanup has finished
    pub fn with_completion(mut self, done: oneshot::Sender<()>) -> Self {
        self.completion = Some(done);
        self
    }

    /// Run the test to completion.
    ///
    /// The load input is switched off and the channel stopped before this
    /// returns, on success and on error alike. If switching off fails the
    /// failure is logged and the run's own result is returned.
    pub fn run(mut self) -> Result<DischargeReport> {
        let outcome = self.drive();
        if let Err(e) = &outcome {
            error!("Discharge aborted: {}", e);
        }
        self.shutdown();
        outcome
    }

    fn drive(&self) -> Result<DischargeReport> {
        let limits = &self.limits;
        let started_at = Utc::now();
        let started = self.clock.now();

        self.channel.set_constant_current(limits.discharge_current)?;
        let mut state = DischargeState::new(limits.initial_capacity_mah);
        self.channel.enable_input()?;
        info!(
            "Discharging at {:.4}A, CV below {:.3}V, cutoff {:.4}A, limit {}s",
            limits.discharge_current,
            limits.discharge_voltage,
            limits.cutoff_current,
            limits.time_limit.as_secs()
        );

        let mut last_measured = self.clock.now();
        let mut last_sample = None;
        let stop_reason = loop {
            self.clock.sleep(limits.interval);

            let current = self.channel.measured_current()?;
            let voltage = self.channel.measured_voltage()?;
            let now = self.clock.now();
            let duration = now.saturating_duration_since(last_measured);
            last_sample = Some(Sample { voltage, current });

            if !self.channel.is_input_enabled()? {
                break StopReason::InputDisabled;
            }
            if self.stop.is_stopped() {
                break StopReason::ShutdownRequested;
            }

            if state.needs_constant_voltage(voltage, limits.discharge_voltage) {
                info!("Voltage {:.3}V below threshold, switching to CV", voltage);
                self.channel.set_constant_voltage(limits.discharge_voltage)?;
                // the load may drop its input on a mode change
                self.channel.enable_input()?;
                state.enter_constant_voltage();
            }

            if now.saturating_duration_since(started) >= limits.time_limit {
                break StopReason::TimeLimit;
            }
            if current < limits.cutoff_current {
                break StopReason::CutoffReached;
            }

            let milli_ampere_hours = state.integrate(current, duration);
            info!(
                " mode={} duration={} voltage={:.3} current={:.3} sumMilliAmpereHours={:.3} milliAmpereHours={:.3}",
                state.mode(),
                duration.as_millis(),
                voltage,
                current,
                state.capacity_mah(),
                milli_ampere_hours
            );

            last_measured = now;
        };
        info!("Stopping: {}", stop_reason);

        Ok(DischargeReport {
            started_at,
            finished_at: Utc::now(),
            stop_reason,
            final_mode: state.mode(),
            samples: state.samples(),
            capacity_mah: state.capacity_mah(),
            last_sample,
        })
    }

    fn shutdown(&mut self) {
        match self.channel.disable_input() {
            Ok(()) => info!("Load input disabled"),
            Err(e) => error!("Failed to disable load input: {}", e),
        }
        self.channel.stop();
        if let Some(done) = self.completion.take() {
            // receiver may already be gone when nobody waits for shutdown
            let _ = done.send(());
        }
    }
}
