//! Fleet coordination: a registry of vehicles, a relay that forwards
//! commands to them, a poller that aggregates their telemetry, and a
//! registry of block areas, all behind one HTTP server.

pub mod aggregator;
pub mod block_areas;
pub mod config;
pub mod errors;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod server;

pub use config::FleetConfig;
pub use errors::FleetError;
pub use server::{FleetHandle, FleetServer};
