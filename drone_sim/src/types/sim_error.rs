use std::fmt;

use drone_protocol::errors::{ProtocolError, ValidationError};
use logger::LoggerError;

/// Represents errors that can occur in the vehicle simulator.
#[derive(Debug)]
pub enum SimError {
    AlreadyFlying,        // takeoff while airborne
    NotFlying,            // land, move or move_to while grounded
    Validation(ValidationError),
    MalformedBody(String),
    InvalidConfig(String),
    TimerStartError(String),
    ThreadJoinError(String),
    LockError,            // poisoned vehicle lock
    Io(std::io::Error),
    Protocol(ProtocolError),
    Logger(LoggerError),
}

impl SimError {
    /// True for rejections that leave the vehicle untouched and are reported as a command reply.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SimError::AlreadyFlying | SimError::NotFlying)
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::AlreadyFlying => write!(f, "Drone is already flying"),
            SimError::NotFlying => write!(f, "Drone is not flying"),
            SimError::Validation(e) => write!(f, "{}", e),
            SimError::MalformedBody(msg) => write!(f, "Malformed body: {}", msg),
            SimError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            SimError::TimerStartError(msg) => write!(f, "Timer start error: {}", msg),
            SimError::ThreadJoinError(name) => write!(f, "Thread {} panicked", name),
            SimError::LockError => write!(f, "Failed to acquire the vehicle lock"),
            SimError::Io(e) => write!(f, "I/O Error: {}", e),
            SimError::Protocol(e) => write!(f, "Protocol Error: {}", e),
            SimError::Logger(e) => write!(f, "Logger Error: {}", e),
        }
    }
}

impl std::error::Error for SimError {}

impl From<ValidationError> for SimError {
    fn from(error: ValidationError) -> Self {
        SimError::Validation(error)
    }
}

impl From<std::io::Error> for SimError {
    fn from(error: std::io::Error) -> Self {
        SimError::Io(error)
    }
}

impl From<ProtocolError> for SimError {
    fn from(error: ProtocolError) -> Self {
        SimError::Protocol(error)
    }
}

impl From<LoggerError> for SimError {
    fn from(error: LoggerError) -> Self {
        SimError::Logger(error)
    }
}

impl<T> From<std::sync::PoisonError<T>> for SimError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        SimError::LockError
    }
}
