//! Load Monitor
//!
//! Prints the load's measured voltage and current at a fixed interval until
//! interrupted. Does not change any setting on the load.
//!
//! Usage:
//!   load-monitor
//!   load-monitor --remote 192.168.1.17:18190 --interval-ms 1000

use battery_capacity_tester::constants::{DEFAULT_LOCAL_PORT, DEFAULT_REMOTE, MONITOR_INTERVAL_MS};
use battery_capacity_tester::{Config, ElectronicLoad, Result, UdpScpiChannel};
use clap::Parser;
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "load-monitor", about = "Print electronic load readings periodically")]
struct Args {
    /// Electronic load address (host:port)
    #[arg(long, default_value = DEFAULT_REMOTE)]
    remote: String,

    /// Local UDP port the load replies to
    #[arg(long, default_value_t = DEFAULT_LOCAL_PORT)]
    local_port: u16,

    /// Print interval (ms)
    #[arg(long, default_value_t = MONITOR_INTERVAL_MS)]
    interval_ms: u64,
}

async fn monitor(args: Args) -> Result<()> {
    let config = Config {
        remote: args.remote,
        local_port: args.local_port,
        ..Config::default()
    };
    let mut channel = UdpScpiChannel::new(config.remote_addr()?, config.local_port);
    channel.start()?;
    info!("Monitoring load at {}", channel.remote_addr());

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let voltage = tokio::task::block_in_place(|| channel.measured_voltage())?;
        let current = tokio::task::block_in_place(|| channel.measured_current())?;
        println!("{:.3}V {:.3}A", voltage, current);
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = monitor(Args::parse()).await {
        error!("Monitor stopped: {}", e);
        std::process::exit(1);
    }
}
