use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use drone_protocol::messages::{RegisterRequest, VehicleDetails, VehicleRecordView};

use crate::errors::FleetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Stopped,
    Flying,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Stopped => "stopped",
            VehicleStatus::Flying => "flying",
        }
    }

    pub fn from_flying(is_flying: bool) -> Self {
        if is_flying {
            VehicleStatus::Flying
        } else {
            VehicleStatus::Stopped
        }
    }
}

/// Where a vehicle's control surface listens.
///
/// `host` is kept as registered for display. Every call goes to `socket`,
/// which is resolved once so polls never wait on name lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleAddress {
    pub host: String,
    pub port: u16,
    pub socket: SocketAddr,
}

impl VehicleAddress {
    pub fn resolve(host: &str, port: u16) -> Result<Self, FleetError> {
        let socket = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| FleetError::Validation(format!("Address {} could not be resolved", host)))?;
        Ok(VehicleAddress {
            host: host.to_string(),
            port,
            socket,
        })
    }
}

impl fmt::Display for VehicleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Fleet-side record of a registered vehicle.
///
/// Position, altitude, status and battery are a cache of the last
/// successful relay or poll; they are never read back from the vehicle on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetVehicleRecord {
    pub id: u64,
    pub name: String,
    pub owner_id: i64,
    pub address: VehicleAddress,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub current_altitude: Option<f64>,
    pub status: VehicleStatus,
    pub battery_level: f64,
    pub max_speed: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FleetVehicleRecord {
    pub fn details(&self) -> VehicleDetails {
        VehicleDetails {
            name: self.name.clone(),
            owner_id: self.owner_id,
            address: self.address.host.clone(),
            port: self.address.port,
            max_speed: self.max_speed,
        }
    }

    pub fn view(&self) -> VehicleRecordView {
        VehicleRecordView {
            drone_id: self.id,
            name: self.name.clone(),
            owner_id: self.owner_id,
            address: self.address.host.clone(),
            port: self.address.port,
            current_lat: self.current_lat,
            current_lng: self.current_lng,
            current_altitude: self.current_altitude,
            current_status: self.status.as_str().to_string(),
            battery_level: self.battery_level,
            max_speed: self.max_speed,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

/// Cached fields to overwrite on a record. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<VehicleStatus>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub battery_level: Option<f64>,
}

impl RecordUpdate {
    pub fn status(status: VehicleStatus) -> Self {
        RecordUpdate {
            status: Some(status),
            ..RecordUpdate::default()
        }
    }

    pub fn position(latitude: f64, longitude: f64, altitude: f64) -> Self {
        RecordUpdate {
            latitude: Some(latitude),
            longitude: Some(longitude),
            altitude: Some(altitude),
            ..RecordUpdate::default()
        }
    }
}

/// Record store for registered vehicles.
pub trait FleetRegistry: Send + Sync {
    /// Stores a new vehicle without contacting it.
    fn insert(&self, request: RegisterRequest) -> Result<FleetVehicleRecord, FleetError>;

    fn get(&self, id: u64) -> Result<FleetVehicleRecord, FleetError>;

    /// All records in id order.
    fn list(&self) -> Result<Vec<FleetVehicleRecord>, FleetError>;

    /// Applies `update` and refreshes `updated_at`.
    fn update(&self, id: u64, update: RecordUpdate) -> Result<FleetVehicleRecord, FleetError>;
}

pub const FULL_BATTERY: f64 = 100.0;

/// In-process registry with sequential ids starting at 1.
#[derive(Debug)]
pub struct MemoryRegistry {
    records: RwLock<BTreeMap<u64, FleetVehicleRecord>>,
    next_id: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        MemoryRegistry {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        MemoryRegistry::new()
    }
}

fn not_found() -> FleetError {
    FleetError::NotFound("Drone not found".to_string())
}

impl FleetRegistry for MemoryRegistry {
    fn insert(&self, request: RegisterRequest) -> Result<FleetVehicleRecord, FleetError> {
        request.validate()?;
        let address = VehicleAddress::resolve(&request.address, request.port)?;

        let now = Utc::now();
        let mut records = self.records.write()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = FleetVehicleRecord {
            id,
            name: request.name,
            owner_id: request.owner_id,
            address,
            current_lat: None,
            current_lng: None,
            current_altitude: None,
            status: VehicleStatus::Stopped,
            battery_level: FULL_BATTERY,
            max_speed: request.max_speed,
            created_at: now,
            updated_at: now,
        };
        records.insert(id, record.clone());
        Ok(record)
    }

    fn get(&self, id: u64) -> Result<FleetVehicleRecord, FleetError> {
        self.records.read()?.get(&id).cloned().ok_or_else(not_found)
    }

    fn list(&self) -> Result<Vec<FleetVehicleRecord>, FleetError> {
        Ok(self.records.read()?.values().cloned().collect())
    }

    fn update(&self, id: u64, update: RecordUpdate) -> Result<FleetVehicleRecord, FleetError> {
        let mut records = self.records.write()?;
        let record = records.get_mut(&id).ok_or_else(not_found)?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(latitude) = update.latitude {
            record.current_lat = Some(latitude);
        }
        if let Some(longitude) = update.longitude {
            record.current_lng = Some(longitude);
        }
        if let Some(altitude) = update.altitude {
            record.current_altitude = Some(altitude);
        }
        if let Some(battery) = update.battery_level {
            record.battery_level = battery;
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }
}
