use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::AggregatorSettings;
use crate::errors::FleetError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_POLL_MILLIS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MILLIS: u64 = 2000;
pub const DEFAULT_POLL_WORKERS: usize = 8;

pub const POLL_MILLIS_VAR: &str = "FLEET_POLL_MILLIS";
pub const REQUEST_TIMEOUT_VAR: &str = "FLEET_REQUEST_TIMEOUT_MILLIS";
pub const POLL_WORKERS_VAR: &str = "FLEET_POLL_WORKERS";

/// Startup settings of the fleet server.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    pub bind_addr: String,
    pub log_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    /// Bound on every connect, read and write against a vehicle.
    pub request_timeout: Duration,
    pub poll_workers: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_dir: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_MILLIS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MILLIS),
            poll_workers: DEFAULT_POLL_WORKERS,
        }
    }
}

impl FleetConfig {
    /// Reads `[bind_addr] [log_dir]` and the `FLEET_*` overrides.
    pub fn from_args<F>(args: &[String], env: F) -> Result<Self, FleetError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if args.len() > 2 {
            return Err(FleetError::Validation(
                "Usage: fleet_launcher [bind_addr] [log_dir]".to_string(),
            ));
        }

        let mut config = FleetConfig::default();
        if let Some(addr) = args.first() {
            config.bind_addr = addr.clone();
        }
        config.log_dir = args.get(1).map(PathBuf::from);

        if let Some(millis) = positive(&env, POLL_MILLIS_VAR)? {
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Some(millis) = positive(&env, REQUEST_TIMEOUT_VAR)? {
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(workers) = positive(&env, POLL_WORKERS_VAR)? {
            config.poll_workers = workers as usize;
        }

        Ok(config)
    }

    /// A round waits for connect plus response, each bounded by the request
    /// timeout, but never past the poll interval so the cadence holds.
    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            poll_interval: self.poll_interval,
            round_deadline: (self.request_timeout * 2).min(self.poll_interval),
            workers: self.poll_workers,
        }
    }
}

fn positive<F>(env: &F, name: &str) -> Result<Option<u64>, FleetError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(name) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(Some(value)),
            _ => Err(FleetError::Validation(format!(
                "{} must be a positive integer, got {}",
                name, raw
            ))),
        },
    }
}
