use std::path::PathBuf;

use crate::types::sim_error::SimError;
use crate::types::vehicle_state::{Position, VehicleState, DEFAULT_CRUISE_SPEED};
use crate::types::vehicle::Vehicle;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8001";

pub const CRUISE_SPEED_VAR: &str = "DRONE_CRUISE_SPEED";
pub const HOME_LAT_VAR: &str = "DRONE_HOME_LAT";
pub const HOME_LON_VAR: &str = "DRONE_HOME_LON";

/// Startup settings of a vehicle process.
///
/// Positional arguments: `[bind_addr] [log_dir]`. Everything else comes from
/// the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub bind_addr: String,
    pub log_dir: Option<PathBuf>,
    pub cruise_speed: f64,
    pub home: Position,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_dir: None,
            cruise_speed: DEFAULT_CRUISE_SPEED,
            home: Position::default(),
        }
    }
}

impl SimConfig {
    /// Builds the configuration from the arguments after the program name
    /// and an environment lookup.
    pub fn from_args<F>(args: &[String], env: F) -> Result<Self, SimError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if args.len() > 2 {
            return Err(SimError::InvalidConfig(
                "Usage: drone_sim [bind_addr] [log_dir]".to_string(),
            ));
        }

        let mut config = SimConfig::default();
        if let Some(addr) = args.first() {
            config.bind_addr = addr.clone();
        }
        config.log_dir = args.get(1).map(PathBuf::from);

        if let Some(speed) = parse_var(&env, CRUISE_SPEED_VAR)? {
            if speed <= 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "{} must be positive",
                    CRUISE_SPEED_VAR
                )));
            }
            config.cruise_speed = speed;
        }
        if let Some(latitude) = parse_var(&env, HOME_LAT_VAR)? {
            drone_protocol::messages::validate_latitude(latitude)?;
            config.home.latitude = latitude;
        }
        if let Some(longitude) = parse_var(&env, HOME_LON_VAR)? {
            drone_protocol::messages::validate_longitude(longitude)?;
            config.home.longitude = longitude;
        }

        Ok(config)
    }

    /// A fresh grounded vehicle at the configured home.
    pub fn vehicle(&self) -> Vehicle {
        Vehicle::new(VehicleState::new(self.home, self.cruise_speed))
    }
}

fn parse_var<F>(env: &F, name: &str) -> Result<Option<f64>, SimError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or_else(|| SimError::InvalidConfig(format!("{} is not a number: {}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::from_args(&[], env_of(&[])).unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.bind_addr, "127.0.0.1:8001");
    }

    #[test]
    fn test_args_and_env() {
        let args = vec!["0.0.0.0:9000".to_string(), "/tmp/drone-logs".to_string()];
        let env = env_of(&[
            (CRUISE_SPEED_VAR, "12.5"),
            (HOME_LAT_VAR, "-34.6"),
            (HOME_LON_VAR, "-58.4"),
        ]);
        let config = SimConfig::from_args(&args, env).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/drone-logs")));
        assert_eq!(config.cruise_speed, 12.5);

        let state = config.vehicle().state().unwrap();
        assert_eq!(state.position(), Position::new(-34.6, -58.4, 0.0));
        assert_eq!(state.cruise_speed(), 12.5);
    }

    #[test]
    fn test_rejects_bad_values() {
        for (name, value) in [
            (CRUISE_SPEED_VAR, "fast"),
            (CRUISE_SPEED_VAR, "0"),
            (HOME_LAT_VAR, "91"),
            (HOME_LON_VAR, "NaN"),
        ] {
            assert!(
                SimConfig::from_args(&[], env_of(&[(name, value)])).is_err(),
                "{}={} must be rejected",
                name,
                value
            );
        }

        let too_many: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert!(SimConfig::from_args(&too_many, env_of(&[])).is_err());
    }
}
