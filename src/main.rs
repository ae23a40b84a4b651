use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use gps_relay::logging::init_logging;
use gps_relay::runtime::config::PipelineConfig;
use gps_relay::runtime::RelayRuntime;
use log::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            let _ = init_logging("info", None);
            error!(target: "runtime", "{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging.level, config.logging.file.as_deref()) {
        eprintln!("Failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }
    match &config_path {
        Some(path) => info!(target: "runtime", "Loaded config from {}", path.display()),
        None => info!(target: "runtime", "No config given, using defaults"),
    }

    let runtime = RelayRuntime::new(config);
    let stopper = Arc::clone(&runtime);
    ctrlc::set_handler(move || {
        info!(target: "runtime", "Shutting down...");
        stopper.stop();
    })
    .ok();

    match runtime.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "runtime", "Startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
