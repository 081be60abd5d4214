//! JSON bodies exchanged between vehicles, the fleet server and their clients.
//!
//! Field names follow the vehicle control surface so that a snapshot read
//! from a vehicle can be forwarded by the fleet without reshaping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Altitude used by `takeoff` when the caller does not pass one.
pub const DEFAULT_TAKEOFF_ALTITUDE: f64 = 10.0;
pub const DEFAULT_MAX_SPEED: f64 = 50.0;
/// Largest request body either server accepts.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
/// Marker stored for a vehicle whose status could not be read in a round.
pub const TELEMETRY_FAILURE: &str = "Failed to fetch telemetry";

/// Full state of one vehicle at an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub is_flying: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub battery: f64,
    pub moving_to_target: bool,
    pub target_latitude: Option<f64>,
    pub target_longitude: Option<f64>,
    pub target_altitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

/// Outcome of a control command. A rejected command is a normal reply, not a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub status: CommandStatus,
    pub message: String,
}

impl CommandReply {
    pub fn success(message: impl Into<String>) -> Self {
        CommandReply {
            status: CommandStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CommandReply {
            status: CommandStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Body of `move` (deltas) and `move_to` (absolute goal).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl MoveRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_latitude(self.latitude)?;
        validate_longitude(self.longitude)?;
        validate_altitude(self.altitude)
    }
}

pub fn validate_latitude(latitude: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::new(
            "latitude",
            "Latitude must be between -90 and 90",
        ));
    }
    Ok(())
}

pub fn validate_longitude(longitude: f64) -> Result<(), ValidationError> {
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::new(
            "longitude",
            "Longitude must be between -180 and 180",
        ));
    }
    Ok(())
}

pub fn validate_altitude(altitude: f64) -> Result<(), ValidationError> {
    if !altitude.is_finite() || altitude < 0.0 {
        return Err(ValidationError::new(
            "altitude",
            "Altitude must be a non-negative number",
        ));
    }
    Ok(())
}

/// Reads the optional `altitude` query parameter of a takeoff.
pub fn parse_takeoff_altitude(raw: Option<&str>) -> Result<f64, ValidationError> {
    let altitude = match raw {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::new("altitude", "Altitude must be a number"))?,
        None => DEFAULT_TAKEOFF_ALTITUDE,
    };
    validate_altitude(altitude)?;
    Ok(altitude)
}

fn default_max_speed() -> f64 {
    DEFAULT_MAX_SPEED
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub owner_id: i64,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "Name must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(ValidationError::new("address", "Address must not be empty"));
        }
        if self.port == 0 {
            return Err(ValidationError::new("port", "Port must be between 1 and 65535"));
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(ValidationError::new("max_speed", "Max speed must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDetails {
    pub name: String,
    pub owner_id: i64,
    pub address: String,
    pub port: u16,
    pub max_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub drone_id: u64,
    pub status: String,
    pub details: VehicleDetails,
}

/// Registry view of one vehicle, as listed by the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecordView {
    pub drone_id: u64,
    pub name: String,
    pub owner_id: i64,
    pub address: String,
    pub port: u16,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub current_altitude: Option<f64>,
    pub current_status: String,
    pub battery_level: f64,
    pub max_speed: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayReply {
    pub drone_id: u64,
    pub status: String,
    pub result: CommandReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub drone_id: u64,
    pub status: VehicleSnapshot,
}

/// One vehicle's slot in an aggregation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FleetTelemetryEntry {
    Reported {
        name: String,
        status: VehicleSnapshot,
        current_lat: Option<f64>,
        current_lng: Option<f64>,
        current_altitude: Option<f64>,
        battery_level: f64,
        max_speed: f64,
    },
    Failed {
        error: String,
    },
}

impl FleetTelemetryEntry {
    pub fn failed() -> Self {
        FleetTelemetryEntry::Failed {
            error: TELEMETRY_FAILURE.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FleetTelemetryEntry::Failed { .. })
    }
}

/// Vehicle id to telemetry entry for one aggregation round.
pub type FleetTelemetryFrame = BTreeMap<u64, FleetTelemetryEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAreaRequest {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

impl BlockAreaRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "Name must not be empty"));
        }
        validate_latitude(self.latitude)?;
        validate_longitude(self.longitude)?;
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(ValidationError::new("radius", "Radius must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockArea {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub detail: String,
}

impl ErrorReply {
    pub fn new(detail: impl Into<String>) -> Self {
        ErrorReply {
            detail: detail.into(),
        }
    }
}
