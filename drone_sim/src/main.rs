use std::env;
use std::io::{self, BufRead};

use drone_sim::types::sim_error::SimError;
use drone_sim::{DroneServer, ServerHandle, SimConfig};
use logger::{Color, Logger};

/// Runs one simulated vehicle.
///
/// # Usage
///
/// ```sh
/// DRONE_HOME_LAT=-34.6 DRONE_HOME_LON=-58.4 cargo run --bin drone_sim -- 127.0.0.1:8001 logs
/// ```
///
/// Once started, the console accepts `status`, `pause`, `resume` and `exit`.
/// When stdin is closed the server keeps running until the process is killed.
fn main() -> Result<(), SimError> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = SimConfig::from_args(&args, |key| env::var(key).ok())?;

    let component = format!("drone_{}", config.bind_addr);
    let logger = match &config.log_dir {
        Some(dir) => Logger::new(dir, &component)?,
        None => Logger::console(&component),
    };

    let server = DroneServer::bind(&config.bind_addr, config.vehicle(), logger.clone())?;
    let handle = server.start()?;

    run_console(handle, &logger)
}

fn run_console(handle: ServerHandle, logger: &Logger) -> Result<(), SimError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!("Enter command (status, pause, resume, exit): ");
        let line = match lines.next() {
            Some(line) => line?,
            None => return handle.wait(),
        };

        match line.trim() {
            "" => continue,
            "status" => {
                let snapshot = handle.vehicle().snapshot()?;
                let state = handle.vehicle().state()?;
                println!(
                    "{} | lat {:.6} lon {:.6} alt {:.1} m | speed {:.2} m/s | battery {:.2}% | ticks {}{}",
                    state.status().as_str(),
                    snapshot.latitude,
                    snapshot.longitude,
                    snapshot.altitude,
                    snapshot.speed,
                    snapshot.battery,
                    handle.ticks(),
                    if handle.is_paused() { " (paused)" } else { "" }
                );
            }
            "pause" => {
                handle.pause_physics();
                logger.info("Physics paused", Color::Yellow, true).ok();
            }
            "resume" => {
                handle.resume_physics();
                logger.info("Physics resumed", Color::Yellow, true).ok();
            }
            "exit" => return handle.shutdown(),
            other => println!("Unknown command: {}", other),
        }
    }
}
