use drone_protocol::messages::VehicleSnapshot;

use super::flight_status::FlightStatus;

pub const DEFAULT_CRUISE_SPEED: f64 = 5.0;
pub const FULL_BATTERY: f64 = 100.0;

/// A point in degrees of latitude/longitude and meters of altitude.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Position {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// Physical state of one simulated vehicle.
///
/// Only the `MotionEngine` mutates it. `moving_to_target` implies a target is
/// set and the vehicle is flying. The last target is kept after arrival and
/// after landing, so telemetry keeps reporting the most recent goal.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub(crate) is_flying: bool,
    pub(crate) position: Position,
    pub(crate) speed: f64,
    pub(crate) battery: f64,
    pub(crate) target: Option<Position>,
    pub(crate) moving_to_target: bool,
    pub(crate) cruise_speed: f64,
}

impl VehicleState {
    /// A grounded vehicle with a full battery resting at `home`.
    pub fn new(home: Position, cruise_speed: f64) -> Self {
        VehicleState {
            is_flying: false,
            position: Position { altitude: 0.0, ..home },
            speed: 0.0,
            battery: FULL_BATTERY,
            target: None,
            moving_to_target: false,
            cruise_speed,
        }
    }

    pub fn is_flying(&self) -> bool {
        self.is_flying
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    pub fn target(&self) -> Option<Position> {
        self.target
    }

    pub fn moving_to_target(&self) -> bool {
        self.moving_to_target
    }

    pub fn cruise_speed(&self) -> f64 {
        self.cruise_speed
    }

    pub fn status(&self) -> FlightStatus {
        match (self.is_flying, self.moving_to_target) {
            (false, _) => FlightStatus::Grounded,
            (true, false) => FlightStatus::Drifting,
            (true, true) => FlightStatus::Seeking,
        }
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            is_flying: self.is_flying,
            latitude: self.position.latitude,
            longitude: self.position.longitude,
            altitude: self.position.altitude,
            speed: self.speed,
            battery: self.battery,
            moving_to_target: self.moving_to_target,
            target_latitude: self.target.map(|t| t.latitude),
            target_longitude: self.target.map(|t| t.longitude),
            target_altitude: self.target.map(|t| t.altitude),
        }
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        VehicleState::new(Position::default(), DEFAULT_CRUISE_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_vehicle_is_grounded_at_home() {
        let state = VehicleState::new(Position::new(-34.6, -58.4, 120.0), 7.5);

        assert_eq!(state.status(), FlightStatus::Grounded);
        assert_eq!(state.position(), Position::new(-34.6, -58.4, 0.0));
        assert_eq!(state.battery(), FULL_BATTERY);
        assert_eq!(state.cruise_speed(), 7.5);

        let snapshot = state.snapshot();
        assert!(!snapshot.is_flying);
        assert_eq!(snapshot.target_latitude, None);
    }
}
