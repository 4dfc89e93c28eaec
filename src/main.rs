//! Battery capacity test runner
//!
//! Discharges a battery through the electronic load and reports the drawn
//! capacity. Ctrl-C, SIGTERM or SIGHUP ends the test early; the load input
//! is switched off before the process exits.
//!
//! Usage:
//!   battery-capacity-tester                                  # built-in defaults
//!   battery-capacity-tester --config bench.toml
//!   battery-capacity-tester --remote 10.0.0.5:18190 --discharge-voltage 2.75
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug battery-capacity-tester

use battery_capacity_tester::{
    Config, DischargeReport, DischargeTest, Limits, LoadError, Result, StopToken, UdpScpiChannel,
};
use clap::Parser;
use log::{error, info};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Battery discharge capacity test over a UDP SCPI electronic load
#[derive(Parser, Debug)]
#[command(name = "battery-capacity-tester", version)]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Electronic load address (host:port)
    #[arg(long)]
    remote: Option<String>,

    /// Local UDP port the load replies to
    #[arg(long)]
    local_port: Option<u16>,

    /// Switch to constant voltage below this voltage (V)
    #[arg(long)]
    discharge_voltage: Option<f64>,

    /// Constant discharge current (A)
    #[arg(long)]
    discharge_current: Option<f64>,

    /// Give up after this many seconds
    #[arg(long)]
    time_limit_secs: Option<u64>,

    /// Test is complete once current falls below this (A)
    #[arg(long)]
    cutoff_current: Option<f64>,

    /// Capacity already drawn before this run (mAh)
    #[arg(long)]
    initial_capacity: Option<f64>,

    /// Polling interval (ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Args {
    fn into_config(self) -> Result<(Config, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(remote) = self.remote {
            config.remote = remote;
        }
        if let Some(port) = self.local_port {
            config.local_port = port;
        }
        if let Some(volts) = self.discharge_voltage {
            config.discharge_voltage = volts;
        }
        if let Some(amps) = self.discharge_current {
            config.discharge_current = amps;
        }
        if let Some(secs) = self.time_limit_secs {
            config.time_limit_secs = secs;
        }
        if let Some(amps) = self.cutoff_current {
            config.cutoff_current = amps;
        }
        if let Some(mah) = self.initial_capacity {
            config.initial_capacity_mah = mah;
        }
        if let Some(ms) = self.interval_ms {
            config.interval_ms = ms;
        }

        config.validate()?;
        Ok((config, self.json))
    }
}

/// Process signals that end a running test early
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Take over SIGINT, SIGTERM and SIGHUP so none of them kills the process
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next shutdown signal and return its name
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}

/// Wait for the test task, or stop it on `shutdown` and wait for its cleanup
async fn supervise<T, F>(
    mut task: JoinHandle<Result<T>>,
    stop: StopToken,
    cleaned_up: oneshot::Receiver<()>,
    shutdown: F,
) -> Result<T>
where
    F: Future<Output = &'static str>,
{
    let joined = tokio::select! {
        joined = &mut task => joined,
        name = shutdown => {
            info!("{} received, finishing current sample", name);
            stop.stop();
            // cleanup has run once this resolves, even if the task panicked
            let _ = cleaned_up.await;
            task.await
        }
    };

    joined.map_err(|e| LoadError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

async fn run(config: Config) -> Result<DischargeReport> {
    let mut signals = ShutdownSignals::install()?;

    let mut channel = UdpScpiChannel::new(config.remote_addr()?, config.local_port)
        .with_rpc_timeout(config.rpc_timeout())
        .with_retry_count(config.rpc_retries);
    channel.start()?;
    info!(
        "Talking to load at {} (receiving on {:?})",
        channel.remote_addr(),
        channel.local_addr()
    );

    let stop = StopToken::new();
    let (done, cleaned_up) = oneshot::channel();
    let test =
        DischargeTest::new(channel, Limits::from(&config), stop.clone()).with_completion(done);
    let task = tokio::task::spawn_blocking(move || test.run());

    supervise(task, stop, cleaned_up, signals.recv()).await
}

fn print_summary(report: &DischargeReport, json: bool) {
    info!(
        "Finished ({}) after {}s in {} mode: {:.3}mAh over {} samples",
        report.stop_reason,
        report.duration().num_seconds(),
        report.final_mode,
        report.capacity_mah,
        report.samples
    );

    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, json) = match Args::parse().into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(report) => {
            print_summary(&report, json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Capacity test failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
