//! Node deployable: one-shot beacon slot wait, then periodic sensor/node-body
//! uplink.
//!
//! Entry point mirrors `sast-gateway`'s shape (clap CLI, `tracing_subscriber`
//! init, signal-driven `ShutdownHandle`) with the NodeNo check inverted: a
//! Node refuses to run on NodeNo 0, which is reserved for the Gateway.

mod node_link;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sast_core::machine_info::{self, BatterySource, PiSugar3};
use sast_core::radio::{Radio, DEFAULT_BAUD, DEFAULT_PORT};
use sast_core::runtime::ShutdownHandle;
use sast_core::store::{SetupMode, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sast-node", about = "SAST Node deployable")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Drop every table and exit.
    Clear,
}

const DB_PATH: &str = "sql_sastv3.sqlite";

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let node_no = machine_info::node_no().context("determining NodeNo from hostname")?;
    if node_no == 0 {
        bail!("sast-node refuses to run on a host whose NodeNo is 0 (reserved for the gateway)");
    }

    let cli = Cli::parse();
    let store = Store::new(DB_PATH).context("opening sqlite store")?;

    if let Some(Command::Clear) = cli.command {
        info!("CLEAR: dropping all tables");
        store.create_tables(SetupMode::Clear)?;
        return Ok(());
    }

    run_service(store, node_no)
}

fn run_service(store: Store, node_no: u8) -> Result<()> {
    store.create_tables(SetupMode::StartupNode).context("STARTUP_NODE init")?;

    let shutdown = ShutdownHandle::new();
    install_signal_handlers(shutdown.clone())?;

    let radio = Arc::new(Mutex::new(Radio::open(DEFAULT_PORT, DEFAULT_BAUD).context("opening radio UART")?));

    let time_skew = node_link::TimeSkewLatch::new();

    {
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        node_link::wait_for_slot(&radio, &store, node_no, &shutdown, &time_skew);
        if time_skew.is_latched() {
            error!("node clock is skewed more than 10s from the gateway's beacon; not auto-correcting");
        }
    }

    {
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        let db_path = DB_PATH.to_string();
        std::thread::Builder::new()
            .name("sender".into())
            .spawn(move || {
                let temp_batt = || {
                    let temp = machine_info::cpu_temp_celsius().unwrap_or(0.0);
                    let batt = PiSugar3.read_percent();
                    (temp, batt)
                };
                node_link::run_sender_loop(&radio, &db_path, node_no, temp_batt, shutdown);
            })
            .context("spawning sender thread")?;
    }

    info!(node_no, "sast-node running");

    while !shutdown.is_triggered() {
        shutdown.sleep_interruptible(std::time::Duration::from_secs(1));
    }

    info!("sast-node shutdown complete");
    Ok(())
}

fn install_signal_handlers(shutdown: ShutdownHandle) -> Result<()> {
    let triggered = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGHUP, signal_hook::consts::SIGINT] {
        let flag = triggered.clone();
        signal_hook::flag::register(sig, flag).context("registering signal handler")?;
    }
    std::thread::spawn(move || loop {
        if triggered.load(Ordering::SeqCst) {
            shutdown.trigger();
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    });
    Ok(())
}
