//! `strider` – robot telemetry client.
//!
//! 1. Loads `~/.strider/config.toml`, writing the defaults on first run.
//! 2. Connects to the simulator stream and runs the pose pipeline against
//!    the headless render rig and terrain.
//! 3. Prints connection changes and status lines until **Ctrl-C**, then
//!    cancels captures and closes the channel.

mod config;

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use strider_hal::capture::RigCapture;
use strider_hal::rig::CameraPose;
use strider_hal::sim::{SimRenderRig, SimTerrain};
use strider_memory::calibration::{InMemoryCalibrationStore, SqliteCalibrationStore};
use strider_middleware::{ConnectionState, WsDialer};
use strider_perception::retarget::JointMap;
use strider_runtime::{ClientDeps, ClientEvent, RobotClient, init_tracing};
use strider_types::{CalibrationStore, GeoFix};

fn main() {
    // Before the runtime exists: the span exporter is synchronous.
    let _guard = init_tracing("strider");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    println!("  Endpoint {}", cfg.endpoint_url.dimmed());
    println!();

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start runtime".red(), e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg, stop_rx));
    println!("{}", "  ✓ Exiting strider.".green());
}

fn calibration_store(cfg: &config::Config) -> Box<dyn CalibrationStore> {
    match SqliteCalibrationStore::open(&cfg.state_db_path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(
                path = %cfg.state_db_path.display(),
                error = %e,
                "state database unavailable; calibration will not persist"
            );
            Box::new(InMemoryCalibrationStore::default())
        }
    }
}

async fn run(cfg: config::Config, mut stop: watch::Receiver<bool>) {
    let joint_map = cfg
        .joint_map_path
        .as_deref()
        .map(JointMap::load_or_identity)
        .unwrap_or_default();

    let origin = GeoFix::new(0.0, 0.0);
    let rig = Arc::new(SimRenderRig::new(CameraPose {
        fix: origin,
        height_m: 30.0,
        heading_rad: 0.0,
        pitch_rad: -0.3,
    }));
    let deps = ClientDeps {
        dialer: Arc::new(WsDialer),
        terrain: Arc::new(SimTerrain::flat(origin, 0.0)),
        capture: Arc::new(RigCapture::new(rig)),
        calibration_store: calibration_store(&cfg),
        joint_map,
    };

    let mut client = RobotClient::spawn(cfg.client_config(), deps);
    info!(endpoint = %cfg.endpoint_url, "client started");

    loop {
        tokio::select! {
            event = client.events.recv() => match event {
                Some(ClientEvent::State(state)) => print_state(state),
                Some(ClientEvent::Status(line)) if line.starts_with("[perf]") => {
                    println!("  {}", line.dimmed());
                }
                Some(ClientEvent::Status(line)) => println!("  {} {}", "»".cyan(), line),
                None => break,
            },
            _ = stop.changed() => break,
        }
    }

    client.shutdown().await;
}

fn print_state(state: ConnectionState) {
    let label = match state {
        ConnectionState::Live => "live".green().bold(),
        ConnectionState::Connecting => "connecting".yellow(),
        ConnectionState::Offline => "offline".red(),
    };
    println!("  stream {}", label);
}

fn print_banner() {
    println!();
    println!("{}", r#"      _       _     _           "#.bold().cyan());
    println!("{}", r#"  ___| |_ _ _(_)__| |___ _ _   "#.bold().cyan());
    println!("{}", r#" (_-<  _| '_| / _` / -_) '_|  "#.bold().cyan());
    println!("{}", r#" /__/\__|_| |_\__,_\___|_|    "#.bold().cyan());
    println!();
    println!("  {} {}", "strider".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Robot telemetry client");
    println!();
}
