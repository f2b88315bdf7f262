//! Gateway deployable: beacon/ACK radio link, threshold observer, cloud
//! config sync.
//!
//! Entry point init (`tracing_subscriber::fmt()`, `anyhow::Context` at the
//! process boundary) follows the usual shape for this workspace; the
//! concurrency model here is `std::thread` rather than `tokio`, since the
//! beacon/data link is a strictly time-slotted half-duplex radio protocol
//! with nothing to gain from an async runtime.

mod cloud;
mod config_sync;
mod gateway_link;
mod observer;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sast_core::machine_info;
use sast_core::model::NodeSystemStatus;
use sast_core::radio::{Radio, DEFAULT_BAUD, DEFAULT_PORT};
use sast_core::runtime::{ShutdownHandle, SPAN_BEACON, SPAN_CONFIG_UPDATE, SPAN_SEND_CLOUD};
use sast_core::scheduler;
use sast_core::store::{SetupMode, Store};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sast-gateway", about = "SAST Gateway deployable")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Drop every table and exit.
    Clear,
    /// Force one config pull, verbose, then exit.
    Config,
}

const DB_PATH: &str = "sql_sastv3.sqlite";
const GAS_URL_PATH: &str = "/boot/sast/gas_url.txt";

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let node_no = machine_info::node_no().context("determining NodeNo from hostname")?;
    if node_no != 0 {
        bail!("sast-gateway refuses to run on a host whose NodeNo ({node_no}) is not 0");
    }

    let cli = Cli::parse();
    let store = Store::new(DB_PATH).context("opening sqlite store")?;

    match cli.command {
        Some(Command::Clear) => {
            info!("CLEAR: dropping all tables");
            store.create_tables(SetupMode::Clear)?;
            return Ok(());
        }
        Some(Command::Config) => {
            store.create_tables(SetupMode::Create).context("CREATE init")?;
            let gas_url = read_gas_url()?;
            let cloud = cloud::CloudClient::new(gas_url)?;
            let mut store = store;
            config_sync::run_cycle(&mut store, &cloud);
            return Ok(());
        }
        None => {}
    }

    run_service(store)
}

fn read_gas_url() -> Result<String> {
    let raw = fs::read_to_string(GAS_URL_PATH).with_context(|| format!("reading GAS URL from {GAS_URL_PATH}"))?;
    let url = raw.trim().to_string();
    if url.is_empty() {
        bail!("GAS URL file {GAS_URL_PATH} is empty");
    }
    Ok(url)
}

fn run_service(store: Store) -> Result<()> {
    store.create_tables(SetupMode::StartupGate).context("STARTUP_GATE init")?;

    let gas_url = read_gas_url()?;
    let cloud = Arc::new(cloud::CloudClient::new(gas_url)?);

    let shutdown = ShutdownHandle::new();
    install_signal_handlers(shutdown.clone())?;

    let radio = Arc::new(Mutex::new(Radio::open(DEFAULT_PORT, DEFAULT_BAUD).context("opening radio UART")?));

    {
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("beacon".into())
            .spawn(move || gateway_link::run_beacon_loop(&radio, shutdown))
            .context("spawning beacon thread")?;
    }

    {
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        let db_path = DB_PATH.to_string();
        std::thread::Builder::new()
            .name("receiver".into())
            .spawn(move || {
                let mut store = match Store::new(&db_path) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "receiver thread: failed to open store");
                        return;
                    }
                };
                gateway_link::run_receiver_loop(&radio, &mut store, shutdown);
            })
            .context("spawning receiver thread")?;
    }

    let observer_cloud = cloud.clone();
    let observer_shutdown = shutdown.clone();
    let observer_db = DB_PATH.to_string();
    let observer_task = scheduler::spawn_periodic("observer", SPAN_SEND_CLOUD, observer_shutdown, move || {
        let Ok(mut store) = Store::new(&observer_db) else {
            error!("observer: failed to open store");
            return;
        };
        if let Err(e) = observer::run_cycle(&mut store, &observer_cloud) {
            error!(error = %e, "observer cycle failed");
        }
    });

    let battery_cloud = cloud.clone();
    let battery_shutdown = shutdown.clone();
    let battery_db = DB_PATH.to_string();
    let battery_task = scheduler::spawn_daily_at(
        "battery-check",
        sast_core::runtime::BATTERY_CHECK_HOUR,
        battery_shutdown,
        move || {
            let Ok(store) = Store::new(&battery_db) else {
                error!("battery-check: failed to open store");
                return;
            };
            if let Err(e) = observer::check_battery(&store, &battery_cloud) {
                error!(error = %e, "battery check failed");
            }
        },
    );

    let config_cloud = cloud.clone();
    let config_shutdown = shutdown.clone();
    let config_db = DB_PATH.to_string();
    let config_task = scheduler::spawn_periodic("config-sync", SPAN_CONFIG_UPDATE, config_shutdown, move || {
        let Ok(mut store) = Store::new(&config_db) else {
            error!("config-sync: failed to open store");
            return;
        };
        config_sync::run_cycle(&mut store, &config_cloud);
    });

    info!(
        beacon_interval = ?SPAN_BEACON,
        cloud_interval = ?SPAN_SEND_CLOUD,
        config_interval = ?SPAN_CONFIG_UPDATE,
        "sast-gateway running"
    );

    {
        let store = Store::new(DB_PATH)?;
        store.change_node_status(NodeSystemStatus::Good)?;
    }

    while !shutdown.is_triggered() {
        shutdown.sleep_interruptible(std::time::Duration::from_secs(1));
    }

    observer_task.join();
    battery_task.join();
    config_task.join();
    info!("sast-gateway shutdown complete");
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
