use std::sync::{Arc, Mutex};

use drone_protocol::messages::VehicleSnapshot;

use super::motion::{MotionEngine, TickOutcome};
use super::sim_error::SimError;
use super::vehicle_state::{Position, VehicleState};

/// Shared handle to one simulated vehicle.
///
/// Every read and mutation goes through the same mutex, so the tick driver,
/// control handlers and telemetry loops observe a serialized history.
#[derive(Debug, Clone)]
pub struct Vehicle {
    engine: Arc<Mutex<MotionEngine>>,
}

impl Vehicle {
    pub fn new(state: VehicleState) -> Self {
        Vehicle {
            engine: Arc::new(Mutex::new(MotionEngine::new(state))),
        }
    }

    fn with_engine<R>(&self, f: impl FnOnce(&mut MotionEngine) -> R) -> Result<R, SimError> {
        let mut engine = self.engine.lock()?;
        Ok(f(&mut engine))
    }

    pub fn takeoff(&self, altitude: f64) -> Result<(), SimError> {
        self.with_engine(|engine| engine.takeoff(altitude))?
    }

    pub fn land(&self) -> Result<(), SimError> {
        self.with_engine(|engine| engine.land())?
    }

    /// Applies a delta and returns the resulting position.
    pub fn displace(&self, dlat: f64, dlon: f64, dalt: f64) -> Result<Position, SimError> {
        self.with_engine(|engine| {
            engine.displace(dlat, dlon, dalt)?;
            Ok(engine.state().position())
        })?
    }

    pub fn set_goal(&self, goal: Position) -> Result<(), SimError> {
        self.with_engine(|engine| engine.set_goal(goal))?
    }

    pub fn tick(&self) -> Result<TickOutcome, SimError> {
        self.with_engine(|engine| engine.tick())
    }

    pub fn snapshot(&self) -> Result<VehicleSnapshot, SimError> {
        self.with_engine(|engine| engine.state().snapshot())
    }

    pub fn state(&self) -> Result<VehicleState, SimError> {
        self.with_engine(|engine| engine.state().clone())
    }
}

impl Default for Vehicle {
    fn default() -> Self {
        Vehicle::new(VehicleState::default())
    }
}
