use clap::Parser;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daq_bridge::{
    load_config, AppConfig, CommandHandler, ConnectionServer, DeviceHandle, SamplingEngine,
};

/// Device server for a shared data acquisition unit
#[derive(Parser, Debug)]
#[command(name = "daq-server")]
#[command(about = "Serve sample requests for one DAQ device over TCP", long_about = None)]
struct Args {
    /// Path to configuration file (default: ./daq-bridge.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override listen host
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let log_level = args
        .log_level
        .unwrap_or_else(|| config.logging.log_level.clone());
    initialize_logging(&log_level);
    log_startup_info(&config, args.config.as_ref());

    let device = Arc::new(DeviceHandle::open(config.simulated_device()));
    let engine = SamplingEngine::new(device.clone(), config.sampling.max_count, config.lock_timeout());
    let server = ConnectionServer::bind(
        (config.server.host.as_str(), config.server.port),
        CommandHandler::new(engine),
        config.server_config(),
    )?;

    // must be in place before the address is printed
    setup_shutdown_handler(server.shutdown_flag())?;

    let addr = server.local_addr()?;
    info!("listening on {addr}");
    println!("{addr}");

    let result = server.run();
    if let Err(e) = &result {
        error!("Server stopped with error: {e}");
    }

    info!("Closing device");
    if let Err(e) = device.close(config.lock_timeout()) {
        warn!("Device did not close cleanly: {e}");
    }
    info!("Shutdown complete");

    result.map_err(Into::into)
}

fn log_startup_info(config: &AppConfig, config_path: Option<&PathBuf>) {
    info!("=== DAQ Bridge Server ===");
    match config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: defaults and environment"),
    }
    info!(
        "Device: {} ({}), {} channels, max {} S/s",
        config.device.name,
        config.device.serial,
        config.device.channel_count,
        config.device.max_rate
    );
    info!(
        "Limits: {} samples per channel, {} connections, lock wait {} ms",
        config.sampling.max_count, config.server.max_connections, config.server.lock_timeout_ms
    );
}

/// Sets the server's shutdown flag on SIGINT (Ctrl+C) or SIGTERM
fn setup_shutdown_handler(shutdown_flag: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Termination signal received - initiating graceful shutdown...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
}

fn initialize_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}
