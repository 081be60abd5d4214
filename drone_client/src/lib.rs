use std::{
    fmt,
    io::{self, BufRead, BufReader},
    net::SocketAddr,
    time::Duration,
};

use drone_protocol::{
    errors::ProtocolError,
    messages::{CommandReply, ErrorReply, MoveRequest, VehicleSnapshot},
    ndjson::decode_line,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

/// HTTP client for the control surface of one vehicle.
///
/// Cloning is cheap and clones share one connection pool, so a
/// `DroneClient` can be handed to other threads.
#[derive(Debug, Clone)]
pub struct DroneClient {
    base_url: String,
    http: Client,
}

#[derive(Debug)]
pub enum ClientError {
    ConnectionError,
    TimeoutError,
    IOError,
    InvalidResponse,
    /// The vehicle answered with a non-2xx status.
    UpstreamStatus { status: u16, detail: String },
    SerializationError,
    DeserializationError,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::ConnectionError => write!(f, "Could not connect to the drone"),
            ClientError::TimeoutError => write!(f, "Drone did not answer in time"),
            ClientError::IOError => write!(f, "I/O error talking to the drone"),
            ClientError::InvalidResponse => write!(f, "Drone sent an invalid response"),
            ClientError::UpstreamStatus { status, detail } => {
                write!(f, "Drone answered {}: {}", status, detail)
            }
            ClientError::SerializationError => write!(f, "Failed to encode the request"),
            ClientError::DeserializationError => write!(f, "Failed to decode the drone reply"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::TimeoutError
        } else if error.is_connect() {
            ClientError::ConnectionError
        } else if error.is_decode() || error.is_body() {
            ClientError::InvalidResponse
        } else {
            ClientError::IOError
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(e) => io_error(e),
            ProtocolError::Json(_) | ProtocolError::EmptyLine => ClientError::DeserializationError,
        }
    }
}

fn io_error(error: io::Error) -> ClientError {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::TimeoutError,
        _ => ClientError::IOError,
    }
}

/// Builds a connection pool whose connects and reads are bounded by `timeout`.
///
/// Must not be called from inside an async runtime.
pub fn http_client(timeout: Duration) -> Result<Client, ClientError> {
    Ok(Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?)
}

impl DroneClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self::with_http(http_client(timeout)?, addr))
    }

    /// Talks to `addr` through an existing pool.
    pub fn with_http(http: Client, addr: SocketAddr) -> Self {
        DroneClient {
            base_url: format!("http://{}", addr),
            http,
        }
    }

    pub fn takeoff(&self, altitude: Option<f64>) -> Result<CommandReply, ClientError> {
        let url = match altitude {
            Some(altitude) => format!("{}?altitude={}", self.url("/control/takeoff"), altitude),
            None => self.url("/control/takeoff"),
        };
        read_json(self.http.post(url))
    }

    pub fn land(&self) -> Result<CommandReply, ClientError> {
        read_json(self.http.post(self.url("/control/land")))
    }

    /// Relative displacement: degrees of latitude/longitude and meters of altitude.
    pub fn move_by(&self, delta: &MoveRequest) -> Result<CommandReply, ClientError> {
        read_json(self.post_json("/control/move", delta)?)
    }

    pub fn move_to(&self, goal: &MoveRequest) -> Result<CommandReply, ClientError> {
        read_json(self.post_json("/control/move_to", goal)?)
    }

    pub fn status(&self) -> Result<VehicleSnapshot, ClientError> {
        read_json(self.http.get(self.url("/control/status")))
    }

    /// Opens the vehicle's telemetry stream.
    pub fn subscribe(&self) -> Result<TelemetryStream, ClientError> {
        let response = expect_success(self.http.get(self.url("/telemetry")).send()?)?;
        Ok(TelemetryStream {
            reader: BufReader::new(response),
            finished: false,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_json(&self, path: &str, body: &MoveRequest) -> Result<RequestBuilder, ClientError> {
        let bytes = serde_json::to_vec(body).map_err(|_| ClientError::SerializationError)?;
        Ok(self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(bytes))
    }
}

fn read_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = expect_success(request.send()?)?;
    let body = response.bytes()?;
    serde_json::from_slice(&body).map_err(|_| ClientError::DeserializationError)
}

fn expect_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().unwrap_or_default();
    let detail = serde_json::from_slice::<ErrorReply>(&body)
        .map(|reply| reply.detail)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
    Err(ClientError::UpstreamStatus {
        status: status.as_u16(),
        detail,
    })
}

/// Snapshots read one line at a time from a vehicle's telemetry stream.
///
/// Ends when the vehicle closes the stream or after the first read error.
pub struct TelemetryStream {
    reader: BufReader<Response>,
    finished: bool,
}

impl Iterator for TelemetryStream {
    type Item = Result<VehicleSnapshot, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.finished = true,
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => return Some(decode_line(&line).map_err(ClientError::from)),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(io_error(e)));
                }
            }
        }
        None
    }
}
