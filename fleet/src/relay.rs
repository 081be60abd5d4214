use std::sync::Arc;
use std::time::Duration;

use drone_client::{http_client, DroneClient};
use drone_protocol::messages::{
    validate_altitude, CommandReply, MoveRequest, RegisterReply, RegisterRequest, RelayReply,
    StatusReply, VehicleSnapshot,
};
use logger::{Color, Logger};

use crate::errors::FleetError;
use crate::registry::{FleetRegistry, RecordUpdate, VehicleAddress, VehicleStatus};

/// A control command addressed to one vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleCommand {
    Takeoff { altitude: Option<f64> },
    Land,
    /// Relative displacement.
    Move(MoveRequest),
    /// Absolute goal.
    MoveTo(MoveRequest),
}

impl VehicleCommand {
    pub fn name(&self) -> &'static str {
        match self {
            VehicleCommand::Takeoff { .. } => "takeoff",
            VehicleCommand::Land => "land",
            VehicleCommand::Move(_) => "move",
            VehicleCommand::MoveTo(_) => "move_to",
        }
    }

    fn validate(&self) -> Result<(), FleetError> {
        match self {
            VehicleCommand::Takeoff {
                altitude: Some(altitude),
            } => validate_altitude(*altitude)?,
            VehicleCommand::Move(request) | VehicleCommand::MoveTo(request) => {
                request.validate()?
            }
            _ => {}
        }
        Ok(())
    }

    fn accepted_message(&self) -> &'static str {
        match self {
            VehicleCommand::Takeoff { .. } => "takeoff initiated",
            VehicleCommand::Land => "landing initiated",
            VehicleCommand::Move(_) => "move command sent",
            VehicleCommand::MoveTo(_) => "move_to command sent",
        }
    }

    /// Cached fields to commit once the vehicle accepted the command.
    fn record_update(&self) -> RecordUpdate {
        match self {
            VehicleCommand::Takeoff { .. } => RecordUpdate::status(VehicleStatus::Flying),
            VehicleCommand::Land => RecordUpdate::status(VehicleStatus::Stopped),
            VehicleCommand::Move(request) | VehicleCommand::MoveTo(request) => {
                RecordUpdate::position(request.latitude, request.longitude, request.altitude)
            }
        }
    }
}

/// Point-to-point calls against a vehicle's control surface.
pub trait VehicleTransport: Send + Sync {
    fn command(
        &self,
        address: &VehicleAddress,
        command: &VehicleCommand,
    ) -> Result<CommandReply, FleetError>;

    fn status(&self, address: &VehicleAddress) -> Result<VehicleSnapshot, FleetError>;
}

/// `VehicleTransport` over HTTP with a bounded timeout per call.
///
/// One connection pool is shared by every vehicle.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, FleetError> {
        Ok(HttpTransport {
            http: http_client(timeout)?,
        })
    }

    fn client(&self, address: &VehicleAddress) -> DroneClient {
        DroneClient::with_http(self.http.clone(), address.socket)
    }
}

impl VehicleTransport for HttpTransport {
    fn command(
        &self,
        address: &VehicleAddress,
        command: &VehicleCommand,
    ) -> Result<CommandReply, FleetError> {
        let client = self.client(address);
        let reply = match command {
            VehicleCommand::Takeoff { altitude } => client.takeoff(*altitude)?,
            VehicleCommand::Land => client.land()?,
            VehicleCommand::Move(delta) => client.move_by(delta)?,
            VehicleCommand::MoveTo(goal) => client.move_to(goal)?,
        };
        Ok(reply)
    }

    fn status(&self, address: &VehicleAddress) -> Result<VehicleSnapshot, FleetError> {
        Ok(self.client(address).status()?)
    }
}

/// Forwards fleet-level commands to the addressed vehicle.
///
/// The registry is only written after the vehicle accepted the command; a
/// failed call or a rejected command leaves the record as it was.
pub struct FleetCommandRelay {
    registry: Arc<dyn FleetRegistry>,
    transport: Arc<dyn VehicleTransport>,
    logger: Logger,
}

impl FleetCommandRelay {
    pub fn new(
        registry: Arc<dyn FleetRegistry>,
        transport: Arc<dyn VehicleTransport>,
        logger: Logger,
    ) -> Self {
        FleetCommandRelay {
            registry,
            transport,
            logger,
        }
    }

    pub fn registry(&self) -> &Arc<dyn FleetRegistry> {
        &self.registry
    }

    /// Stores a new vehicle. The address is not contacted.
    pub fn register(&self, request: RegisterRequest) -> Result<RegisterReply, FleetError> {
        let record = self.registry.insert(request)?;
        self.logger
            .info(
                &format!("Registered drone {} '{}' at {}", record.id, record.name, record.address),
                Color::Green,
                true,
            )
            .ok();

        Ok(RegisterReply {
            drone_id: record.id,
            status: "drone registered".to_string(),
            details: record.details(),
        })
    }

    pub fn relay(&self, id: u64, command: VehicleCommand) -> Result<RelayReply, FleetError> {
        command.validate()?;
        let record = self.registry.get(id)?;

        let reply = match self.transport.command(&record.address, &command) {
            Ok(reply) => reply,
            Err(e) => {
                self.logger
                    .warn(
                        &format!("{} for drone {} failed: {}", command.name(), id, e),
                        true,
                    )
                    .ok();
                return Err(e);
            }
        };

        if !reply.is_success() {
            self.logger
                .warn(
                    &format!("Drone {} rejected {}: {}", id, command.name(), reply.message),
                    true,
                )
                .ok();
            return Err(FleetError::UpstreamStatus {
                status: 409,
                detail: reply.message,
            });
        }

        self.registry.update(id, command.record_update())?;
        self.logger
            .info(
                &format!("Drone {} accepted {}: {}", id, command.name(), reply.message),
                Color::Blue,
                true,
            )
            .ok();

        Ok(RelayReply {
            drone_id: id,
            status: command.accepted_message().to_string(),
            result: reply,
        })
    }

    /// Reads the live snapshot of a vehicle. The record is not modified.
    pub fn status(&self, id: u64) -> Result<StatusReply, FleetError> {
        let record = self.registry.get(id)?;
        let snapshot = self.transport.status(&record.address)?;
        Ok(StatusReply {
            drone_id: id,
            status: snapshot,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted vehicles keyed by port. Unknown ports behave as unreachable.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub(crate) snapshots: Mutex<HashMap<u16, VehicleSnapshot>>,
        pub(crate) replies: Mutex<HashMap<u16, CommandReply>>,
        pub(crate) calls: Mutex<Vec<(u16, String)>>,
    }

    impl FakeTransport {
        pub(crate) fn calls(&self) -> Vec<(u16, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl VehicleTransport for FakeTransport {
        fn command(
            &self,
            address: &VehicleAddress,
            command: &VehicleCommand,
        ) -> Result<CommandReply, FleetError> {
            self.calls
                .lock()
                .unwrap()
                .push((address.port, command.name().to_string()));
            self.replies
                .lock()
                .unwrap()
                .get(&address.port)
                .cloned()
                .ok_or_else(|| FleetError::Transport("connection refused".to_string()))
        }

        fn status(&self, address: &VehicleAddress) -> Result<VehicleSnapshot, FleetError> {
            self.calls
                .lock()
                .unwrap()
                .push((address.port, "status".to_string()));
            self.snapshots
                .lock()
                .unwrap()
                .get(&address.port)
                .cloned()
                .ok_or_else(|| FleetError::Transport("connection refused".to_string()))
        }
    }

    pub(crate) fn register_request(name: &str, port: u16) -> RegisterRequest {
        RegisterRequest {
            name: name.to_string(),
            owner_id: 1,
            address: "127.0.0.1".to_string(),
            port,
            max_speed: 40.0,
        }
    }

    pub(crate) fn snapshot(is_flying: bool, latitude: f64) -> VehicleSnapshot {
        VehicleSnapshot {
            is_flying,
            latitude,
            longitude: 0.5,
            altitude: if is_flying { 20.0 } else { 0.0 },
            speed: 0.0,
            battery: 88.0,
            moving_to_target: false,
            target_latitude: None,
            target_longitude: None,
            target_altitude: None,
        }
    }

    fn relay_with(transport: Arc<FakeTransport>) -> (FleetCommandRelay, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        let relay = FleetCommandRelay::new(
            registry.clone(),
            transport,
            Logger::console("fleet-test"),
        );
        (relay, registry)
    }

    #[test]
    fn test_unknown_id_never_touches_the_network() {
        let transport = Arc::new(FakeTransport::default());
        let (relay, _) = relay_with(transport.clone());

        assert!(matches!(relay.relay(42, VehicleCommand::Land), Err(FleetError::NotFound(_))));
        assert!(matches!(relay.status(42), Err(FleetError::NotFound(_))));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_register_does_not_contact_vehicle() {
        let transport = Arc::new(FakeTransport::default());
        let (relay, registry) = relay_with(transport.clone());

        let reply = relay.register(register_request("alpha", 9001)).unwrap();
        assert_eq!(reply.drone_id, 1);
        assert_eq!(reply.status, "drone registered");
        assert_eq!(reply.details.max_speed, 40.0);
        assert_eq!(registry.list().unwrap().len(), 1);
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_successful_takeoff_commits_status() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .replies
            .lock()
            .unwrap()
            .insert(9001, CommandReply::success("Drone took off to 15.0 meters"));
        let (relay, registry) = relay_with(transport.clone());
        let id = relay.register(register_request("alpha", 9001)).unwrap().drone_id;

        let reply = relay
            .relay(id, VehicleCommand::Takeoff { altitude: Some(15.0) })
            .unwrap();

        assert_eq!(reply.status, "takeoff initiated");
        assert!(reply.result.is_success());
        assert_eq!(registry.get(id).unwrap().status, VehicleStatus::Flying);
        assert_eq!(transport.calls(), vec![(9001, "takeoff".to_string())]);
    }

    #[test]
    fn test_move_to_caches_requested_position() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .replies
            .lock()
            .unwrap()
            .insert(9001, CommandReply::success("Drone moving to lat: 1.0, lon: 2.0, alt: 3.0"));
        let (relay, registry) = relay_with(transport);
        let id = relay.register(register_request("alpha", 9001)).unwrap().drone_id;

        let goal = MoveRequest {
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
        };
        assert_eq!(
            relay.relay(id, VehicleCommand::MoveTo(goal)).unwrap().status,
            "move_to command sent"
        );

        let record = registry.get(id).unwrap();
        assert_eq!(record.current_lat, Some(1.0));
        assert_eq!(record.current_lng, Some(2.0));
        assert_eq!(record.current_altitude, Some(3.0));
    }

    #[test]
    fn test_failed_call_leaves_record_unchanged() {
        let transport = Arc::new(FakeTransport::default());
        let (relay, registry) = relay_with(transport.clone());
        let id = relay.register(register_request("alpha", 9001)).unwrap().drone_id;
        let before = registry.get(id).unwrap();

        let result = relay.relay(id, VehicleCommand::Takeoff { altitude: None });

        assert!(matches!(result, Err(FleetError::Transport(_))));
        assert_eq!(registry.get(id).unwrap(), before);
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_rejected_command_is_a_conflict() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .replies
            .lock()
            .unwrap()
            .insert(9001, CommandReply::error("Drone is not flying"));
        let (relay, registry) = relay_with(transport);
        let id = relay.register(register_request("alpha", 9001)).unwrap().drone_id;
        let before = registry.get(id).unwrap();

        match relay.relay(id, VehicleCommand::Land) {
            Err(FleetError::UpstreamStatus { status, detail }) => {
                assert_eq!(status, 409);
                assert_eq!(detail, "Drone is not flying");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.get(id).unwrap(), before);
    }

    #[test]
    fn test_invalid_command_is_rejected_before_lookup() {
        let transport = Arc::new(FakeTransport::default());
        let (relay, _) = relay_with(transport.clone());

        let bad = MoveRequest {
            latitude: 91.0,
            longitude: 0.0,
            altitude: 0.0,
        };
        assert!(matches!(
            relay.relay(1, VehicleCommand::Move(bad)),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            relay.relay(1, VehicleCommand::Takeoff { altitude: Some(-1.0) }),
            Err(FleetError::Validation(_))
        ));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_status_is_read_only() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .snapshots
            .lock()
            .unwrap()
            .insert(9001, snapshot(true, 3.0));
        let (relay, registry) = relay_with(transport);
        let id = relay.register(register_request("alpha", 9001)).unwrap().drone_id;
        let before = registry.get(id).unwrap();

        let reply = relay.status(id).unwrap();
        assert_eq!(reply.drone_id, id);
        assert_eq!(reply.status.latitude, 3.0);
        assert_eq!(registry.get(id).unwrap(), before);
    }
}
