use std::fmt::{self, Display};
use std::io;

use drone_client::ClientError;
use drone_protocol::errors::{ProtocolError, ValidationError};
use logger::LoggerError;

/// Errors raised by the fleet registry, relay, aggregator and server.
#[derive(Debug)]
pub enum FleetError {
    /// Input rejected at the boundary. Nothing was stored or sent.
    Validation(String),
    /// Unknown vehicle id, block area id or route.
    NotFound(String),
    /// The vehicle could not be reached or sent something unreadable.
    Transport(String),
    /// The vehicle answered, but not with success.
    UpstreamStatus { status: u16, detail: String },
    LockError,
    /// The server is stopping and takes no new subscribers.
    ShuttingDown,
    /// A worker thread panicked.
    ThreadError(String),
    Io(io::Error),
    Protocol(ProtocolError),
    Logger(LoggerError),
    Json(String),
}

impl FleetError {
    /// Status code returned to the HTTP caller for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            FleetError::Validation(_) => 422,
            FleetError::NotFound(_) => 404,
            FleetError::Transport(_) => 502,
            FleetError::UpstreamStatus { status, .. } => *status,
            FleetError::Json(_) => 400,
            FleetError::ShuttingDown => 503,
            FleetError::LockError
            | FleetError::Protocol(_)
            | FleetError::ThreadError(_)
            | FleetError::Io(_)
            | FleetError::Logger(_) => 500,
        }
    }

    /// Message placed in the `detail` field of an error body.
    pub fn detail(&self) -> String {
        match self {
            FleetError::Validation(msg) | FleetError::NotFound(msg) => msg.clone(),
            FleetError::UpstreamStatus { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetError::Validation(msg) => write!(f, "Validation Error: {}", msg),
            FleetError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            FleetError::Transport(msg) => write!(f, "Transport Error: {}", msg),
            FleetError::UpstreamStatus { status, detail } => {
                write!(f, "Upstream Error {}: {}", status, detail)
            }
            FleetError::LockError => write!(f, "Failed to acquire lock"),
            FleetError::ShuttingDown => write!(f, "Server is shutting down"),
            FleetError::ThreadError(name) => write!(f, "Thread {} panicked", name),
            FleetError::Io(e) => write!(f, "I/O Error: {}", e),
            FleetError::Protocol(e) => write!(f, "Protocol Error: {}", e),
            FleetError::Logger(e) => write!(f, "Logger Error: {}", e),
            FleetError::Json(msg) => write!(f, "Invalid JSON: {}", msg),
        }
    }
}

impl std::error::Error for FleetError {}

impl From<ValidationError> for FleetError {
    fn from(error: ValidationError) -> Self {
        FleetError::Validation(error.to_string())
    }
}

impl From<ClientError> for FleetError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::UpstreamStatus { status, detail } => {
                FleetError::UpstreamStatus { status, detail }
            }
            other => FleetError::Transport(other.to_string()),
        }
    }
}

impl From<ProtocolError> for FleetError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Json(msg) => FleetError::Json(msg),
            other => FleetError::Protocol(other),
        }
    }
}

impl From<io::Error> for FleetError {
    fn from(error: io::Error) -> Self {
        FleetError::Io(error)
    }
}

impl From<LoggerError> for FleetError {
    fn from(error: LoggerError) -> Self {
        FleetError::Logger(error)
    }
}

impl<T> From<std::sync::PoisonError<T>> for FleetError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        FleetError::LockError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(FleetError::Validation("bad".into()).http_status(), 422);
        assert_eq!(FleetError::NotFound("Drone not found".into()).http_status(), 404);
        assert_eq!(FleetError::from(ClientError::ConnectionError).http_status(), 502);
        assert_eq!(FleetError::from(ClientError::TimeoutError).http_status(), 502);

        let upstream = FleetError::from(ClientError::UpstreamStatus {
            status: 422,
            detail: "Altitude must be a non-negative number".into(),
        });
        assert_eq!(upstream.http_status(), 422);
        assert_eq!(upstream.detail(), "Altitude must be a non-negative number");
    }
}
