use std::env;

use fleet::{FleetConfig, FleetServer};
use logger::Logger;

/// Starts the fleet server.
///
/// # Usage
///
/// ```sh
/// FLEET_POLL_MILLIS=1000 cargo run --bin fleet_launcher -- 127.0.0.1:8000 logs
/// ```
///
/// Vehicles are registered at runtime through `POST /fleet/register`. The
/// server runs until the process is killed.
fn main() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = FleetConfig::from_args(&args, |key| env::var(key).ok()).map_err(|e| e.to_string())?;

    let component = format!("fleet_{}", config.bind_addr);
    let logger = match &config.log_dir {
        Some(dir) => Logger::new(dir, &component).map_err(|e| e.to_string())?,
        None => Logger::console(&component),
    };

    let server = FleetServer::bind(&config, logger).map_err(|e| e.to_string())?;
    let handle = server.start().map_err(|e| e.to_string())?;

    handle.wait().map_err(|e| e.to_string())
}
