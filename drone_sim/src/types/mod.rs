/// Physics step. Motion math assumes exactly this interval.
pub const TICK_FREQUENCY_MILLIS: u64 = 100;
pub const TICK_SECONDS: f64 = TICK_FREQUENCY_MILLIS as f64 / 1000.0;
pub const TELEMETRY_PERIOD_MILLIS: u64 = 100;

pub mod control;

pub mod flight_status;

pub mod motion;

pub mod server;

pub mod sim_error;

pub mod telemetry;

pub mod timer;

pub mod vehicle;

pub mod vehicle_state;
