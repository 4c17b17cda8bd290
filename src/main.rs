//! Read one GATT characteristic from a BLE peripheral.
//!
//! Run with: gatt-read AA:BB:CC:DD:EE:FF 180a 2a26

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gatt_reader::{
    BackendConfig, BtleplugBackend, Device, DeviceManager, Error, ReadOutcome, Result,
    TargetSelector,
};

/// How long an interrupted run waits for the disconnect to complete.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// GATT Read Characteristic
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// MAC address of device to connect
    mac_address: String,

    /// 16-bit service ID (e.g., 180a)
    service: String,

    /// 16-bit characteristic ID (e.g., 2a26)
    characteristic: String,

    /// Adapter to use (e.g., hci0); defaults to the first adapter
    #[arg(long)]
    adapter: Option<String>,

    /// Seconds to scan for the device before the connection fails
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    /// Log lifecycle details to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "gatt_reader=debug"
    } else {
        "gatt_reader=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<ReadOutcome> {
    let target = TargetSelector::new(&args.mac_address, &args.service, &args.characteristic)?;
    let config = BackendConfig {
        adapter: args.adapter,
        scan_timeout: Duration::from_secs(args.scan_timeout),
        ..Default::default()
    };

    let (mut manager, events) = DeviceManager::new();
    let backend = BtleplugBackend::new(target.address(), config, events).await?;
    let mut device = Device::new(target, backend, manager.event_loop());

    let mut status = device.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(line) => println!("{}", line),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} status lines", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager.connect(&mut device);
    let outcome = tokio::select! {
        outcome = manager.run(&mut device) => outcome,
        _ = tokio::signal::ctrl_c() => Err(Error::Interrupted),
    };

    if matches!(outcome, Err(Error::Interrupted)) {
        manager.shutdown(&mut device, SHUTDOWN_GRACE).await;
    }

    // Closes the status channel so the printer drains and exits.
    drop(device);
    let _ = printer.await;

    outcome
}
