pub mod config;
pub mod types;

pub use config::SimConfig;
pub use types::server::{DroneServer, ServerHandle};
pub use types::vehicle::Vehicle;
