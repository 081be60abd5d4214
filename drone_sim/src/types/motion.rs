use super::sim_error::SimError;
use super::vehicle_state::{Position, VehicleState};
use super::TICK_SECONDS;

/// Flat-earth scale: meters per degree of latitude or longitude.
pub const METERS_PER_DEGREE: f64 = 111_000.0;
/// Distance under which a seeking vehicle snaps onto its target.
pub const ARRIVAL_THRESHOLD_METERS: f64 = 0.1;
const MIN_DISTANCE_METERS: f64 = 0.0001;
/// Battery percentage spent by each displacement or seek step. No floor is applied.
pub const BATTERY_DRAIN_PER_STEP: f64 = 0.01;
/// Degrees applied to latitude and longitude on every idle tick while airborne.
pub const DRIFT_DEGREES: f64 = 0.0001;

/// What a single tick did to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Grounded,
    Drifted,
    Advanced,
    Arrived,
}

/// Advances a `VehicleState` on a fixed tick and applies control commands.
///
/// Commands that do not apply to the current flight state return an error
/// and leave the state untouched.
#[derive(Debug, Clone, Default)]
pub struct MotionEngine {
    state: VehicleState,
}

impl MotionEngine {
    pub fn new(state: VehicleState) -> Self {
        MotionEngine { state }
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    /// Grounded to airborne at `altitude`. No altitude ceiling is enforced.
    pub fn takeoff(&mut self, altitude: f64) -> Result<(), SimError> {
        if self.state.is_flying {
            return Err(SimError::AlreadyFlying);
        }
        self.state.is_flying = true;
        self.state.position.altitude = altitude;
        Ok(())
    }

    /// Airborne to grounded. Drops altitude and speed to zero and cancels seeking.
    pub fn land(&mut self) -> Result<(), SimError> {
        if !self.state.is_flying {
            return Err(SimError::NotFlying);
        }
        self.state.is_flying = false;
        self.state.position.altitude = 0.0;
        self.state.speed = 0.0;
        self.state.moving_to_target = false;
        Ok(())
    }

    /// Applies a raw position delta and derives speed as if it took one tick.
    pub fn displace(&mut self, dlat: f64, dlon: f64, dalt: f64) -> Result<(), SimError> {
        if !self.state.is_flying {
            return Err(SimError::NotFlying);
        }
        let position = &mut self.state.position;
        position.latitude += dlat;
        position.longitude += dlon;
        position.altitude += dalt;

        self.state.speed = flat_distance(dlat, dlon, dalt) / TICK_SECONDS;
        self.state.battery -= BATTERY_DRAIN_PER_STEP;
        Ok(())
    }

    /// Stores an absolute goal and starts seeking it on the next tick.
    pub fn set_goal(&mut self, goal: Position) -> Result<(), SimError> {
        if !self.state.is_flying {
            return Err(SimError::NotFlying);
        }
        self.state.target = Some(goal);
        self.state.moving_to_target = true;
        Ok(())
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.state.is_flying {
            return TickOutcome::Grounded;
        }

        match self.state.target.filter(|_| self.state.moving_to_target) {
            Some(target) => self.seek(target),
            None => {
                // Idle vehicles wander slowly instead of holding position.
                self.displace(DRIFT_DEGREES, DRIFT_DEGREES, 0.0).ok();
                TickOutcome::Drifted
            }
        }
    }

    fn seek(&mut self, target: Position) -> TickOutcome {
        let position = self.state.position;
        let dlat = target.latitude - position.latitude;
        let dlon = target.longitude - position.longitude;
        let dalt = target.altitude - position.altitude;
        let distance = flat_distance(dlat, dlon, dalt);

        if distance < ARRIVAL_THRESHOLD_METERS {
            self.state.position = target;
            self.state.moving_to_target = false;
            self.state.speed = 0.0;
            return TickOutcome::Arrived;
        }

        let step_distance = self.state.cruise_speed * TICK_SECONDS;
        let step_ratio = (step_distance / distance.max(MIN_DISTANCE_METERS)).min(1.0);

        let position = &mut self.state.position;
        position.latitude += dlat * step_ratio;
        position.longitude += dlon * step_ratio;
        position.altitude += dalt * step_ratio;

        self.state.speed = step_distance / TICK_SECONDS;
        self.state.battery -= BATTERY_DRAIN_PER_STEP;
        TickOutcome::Advanced
    }
}

/// Euclidean length in meters of a delta given in degrees and meters.
pub fn flat_distance(dlat: f64, dlon: f64, dalt: f64) -> f64 {
    let north = dlat * METERS_PER_DEGREE;
    let east = dlon * METERS_PER_DEGREE;
    (north * north + east * east + dalt * dalt).sqrt()
}

/// Flat-earth distance in meters between two positions.
pub fn distance_between(from: Position, to: Position) -> f64 {
    flat_distance(
        to.latitude - from.latitude,
        to.longitude - from.longitude,
        to.altitude - from.altitude,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::flight_status::FlightStatus;
    use crate::types::vehicle_state::DEFAULT_CRUISE_SPEED;

    const EPSILON: f64 = 1e-9;

    fn airborne(altitude: f64) -> MotionEngine {
        let mut engine = MotionEngine::default();
        engine.takeoff(altitude).expect("grounded vehicle takes off");
        engine
    }

    #[test]
    fn test_displace_while_grounded_changes_nothing() {
        let mut engine = MotionEngine::default();
        let before = engine.state().clone();

        for (dlat, dlon, dalt) in [(0.5, 0.5, 3.0), (0.0, 0.0, 0.0), (-1.0, 2.0, 10.0)] {
            assert!(matches!(
                engine.displace(dlat, dlon, dalt),
                Err(SimError::NotFlying)
            ));
        }

        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn test_second_takeoff_is_rejected() {
        let mut engine = MotionEngine::default();

        engine.takeoff(20.0).expect("first takeoff");
        let after_first = engine.state().clone();

        assert!(matches!(engine.takeoff(50.0), Err(SimError::AlreadyFlying)));
        assert_eq!(engine.state(), &after_first);
        assert_eq!(engine.state().position().altitude, 20.0);
    }

    #[test]
    fn test_land_resets_and_rejects_when_grounded() {
        let mut engine = airborne(15.0);
        engine
            .set_goal(Position::new(1.0, 1.0, 30.0))
            .expect("goal while airborne");
        engine.tick();

        engine.land().expect("land while airborne");
        let state = engine.state();
        assert_eq!(state.status(), FlightStatus::Grounded);
        assert_eq!(state.position().altitude, 0.0);
        assert_eq!(state.speed(), 0.0);
        assert!(!state.moving_to_target());

        assert!(matches!(engine.land(), Err(SimError::NotFlying)));
    }

    #[test]
    fn test_displace_derives_speed_and_drains_battery() {
        let mut engine = airborne(10.0);
        let dlat = 3.0 / METERS_PER_DEGREE;
        let dlon = 4.0 / METERS_PER_DEGREE;

        engine.displace(dlat, dlon, 0.0).expect("airborne displace");

        let state = engine.state();
        assert!((state.speed() - 50.0).abs() < 1e-6);
        assert!((state.battery() - 99.99).abs() < EPSILON);
        assert!((state.position().latitude - dlat).abs() < EPSILON);
    }

    #[test]
    fn test_goal_while_grounded_is_ignored() {
        let mut engine = MotionEngine::default();
        assert!(engine.set_goal(Position::new(1.0, 1.0, 1.0)).is_err());
        assert_eq!(engine.state().target(), None);
        assert_eq!(engine.tick(), TickOutcome::Grounded);
    }

    #[test]
    fn test_idle_tick_drifts() {
        let mut engine = airborne(10.0);

        assert_eq!(engine.tick(), TickOutcome::Drifted);

        let state = engine.state();
        assert_eq!(state.position().latitude, DRIFT_DEGREES);
        assert_eq!(state.position().longitude, DRIFT_DEGREES);
        assert_eq!(state.position().altitude, 10.0);
        assert!(state.speed() > 0.0);
        assert!((state.battery() - 99.99).abs() < EPSILON);
    }

    #[test]
    fn test_seek_ten_meters_north() {
        let mut engine = airborne(10.0);
        let target = Position::new(10.0 / METERS_PER_DEGREE, 0.0, 10.0);
        engine.set_goal(target).expect("goal");

        let step = DEFAULT_CRUISE_SPEED * TICK_SECONDS;
        let max_ticks = (10.0 / step).ceil() as usize;
        let mut previous = distance_between(engine.state().position(), target);

        for _ in 0..max_ticks {
            assert_eq!(engine.tick(), TickOutcome::Advanced);
            let distance = distance_between(engine.state().position(), target);
            assert!(distance < previous, "distance must strictly decrease");
            assert!(engine.state().speed() >= 0.0);
            previous = distance;
        }
        assert!(previous < ARRIVAL_THRESHOLD_METERS);

        assert_eq!(engine.tick(), TickOutcome::Arrived);
        let state = engine.state();
        assert_eq!(state.position(), target);
        assert_eq!(state.speed(), 0.0);
        assert_eq!(state.status(), FlightStatus::Drifting);
        assert_eq!(state.target(), Some(target));
    }

    #[test]
    fn test_seek_never_overshoots() {
        let mut engine = airborne(0.0);
        let target = Position::new(0.0, 0.3 / METERS_PER_DEGREE, 0.0);
        engine.set_goal(target).expect("goal");

        assert_eq!(engine.tick(), TickOutcome::Advanced);
        assert!(distance_between(engine.state().position(), target) < EPSILON);
        assert_eq!(engine.tick(), TickOutcome::Arrived);
        assert_eq!(engine.state().position(), target);
    }

    #[test]
    fn test_goal_on_current_position_arrives_immediately() {
        let mut engine = airborne(12.0);
        let here = engine.state().position();
        engine.set_goal(here).expect("goal");

        assert_eq!(engine.tick(), TickOutcome::Arrived);
        assert_eq!(engine.state().position(), here);
        assert!(engine.state().speed().is_finite());
        assert_eq!(engine.state().battery(), 100.0);
    }

    #[test]
    fn test_battery_can_go_negative() {
        let mut engine = airborne(10.0);
        for _ in 0..10_050 {
            engine.tick();
        }
        assert!(engine.state().battery() < 0.0);
        assert!(engine.state().is_flying());
    }
}
