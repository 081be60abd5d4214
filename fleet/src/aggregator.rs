use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use drone_protocol::messages::{FleetTelemetryEntry, FleetTelemetryFrame, VehicleSnapshot};
use drone_protocol::ndjson::encode_line;
use logger::{Color, Logger};
use threadpool::ThreadPool;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

use crate::errors::FleetError;
use crate::registry::{FleetRegistry, FleetVehicleRecord, RecordUpdate, VehicleStatus};
use crate::relay::VehicleTransport;

const STOP_POLL_MILLIS: u64 = 20;

/// Destination of aggregated telemetry frames.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, frame: &[u8]) -> io::Result<()>;
}

/// A streaming HTTP subscriber.
///
/// Frames queue in a bounded channel that the response body drains. A full
/// channel means the reader stalled and a closed one means it left. Both fail
/// the send, so the subscriber is dropped instead of holding up the round.
pub struct ChannelSink {
    frames: Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(frames: Sender<Vec<u8>>) -> Self {
        ChannelSink { frames }
    }
}

impl TelemetrySink for ChannelSink {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        self.frames.try_send(frame.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "subscriber is not keeping up")
            }
            TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "subscriber disconnected")
            }
        })
    }
}

#[derive(Default)]
struct SubscriberList {
    closed: bool,
    entries: Vec<(u64, Arc<dyn TelemetrySink>)>,
}

/// Active subscribers of the fleet telemetry stream.
#[derive(Default)]
pub struct SubscriberSet {
    next_id: AtomicU64,
    subscribers: Mutex<SubscriberList>,
}

/// Outcome of pushing one frame to every subscriber.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<u64>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        SubscriberSet::default()
    }

    /// Fails with `ShuttingDown` once the set is closed.
    pub fn add(&self, sink: Arc<dyn TelemetrySink>) -> Result<u64, FleetError> {
        let mut subscribers = self.subscribers.lock()?;
        if subscribers.closed {
            return Err(FleetError::ShuttingDown);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        subscribers.entries.push((id, sink));
        Ok(id)
    }

    pub fn contains(&self, id: u64) -> Result<bool, FleetError> {
        Ok(self
            .subscribers
            .lock()?
            .entries
            .iter()
            .any(|(sub_id, _)| *sub_id == id))
    }

    pub fn len(&self) -> Result<usize, FleetError> {
        Ok(self.subscribers.lock()?.entries.len())
    }

    /// Drops every subscriber, which ends their streams, and refuses new ones.
    pub fn close(&self) -> Result<usize, FleetError> {
        let mut subscribers = self.subscribers.lock()?;
        subscribers.closed = true;
        let count = subscribers.entries.len();
        subscribers.entries.clear();
        Ok(count)
    }

    /// Sends `frame` to a copy of the current set, then removes every
    /// subscriber whose send failed.
    ///
    /// The lock is not held while sending, so subscribers may join or leave
    /// during a broadcast.
    pub fn broadcast(&self, frame: &[u8]) -> Result<BroadcastReport, FleetError> {
        let targets: Vec<(u64, Arc<dyn TelemetrySink>)> =
            self.subscribers.lock()?.entries.clone();

        let mut report = BroadcastReport::default();
        for (id, sink) in targets {
            match sink.send(frame) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.dropped.push(id),
            }
        }

        if !report.dropped.is_empty() {
            self.subscribers
                .lock()?
                .entries
                .retain(|(id, _)| !report.dropped.contains(id));
        }
        Ok(report)
    }
}

/// Frees a vehicle for the next round once its poll is over, panics included.
struct InFlight {
    ids: Arc<Mutex<HashSet<u64>>>,
    id: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.id);
        }
    }
}

/// Timing of the aggregation loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub poll_interval: Duration,
    /// How long a round waits for the slowest vehicle.
    pub round_deadline: Duration,
    /// Initial pool size. The pool grows to the fleet size when needed.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub frame: FleetTelemetryFrame,
    pub broadcast: BroadcastReport,
}

/// Polls every registered vehicle on a fixed cadence and pushes one combined
/// frame per round to all subscribers.
pub struct FleetTelemetryAggregator {
    registry: Arc<dyn FleetRegistry>,
    transport: Arc<dyn VehicleTransport>,
    subscribers: Arc<SubscriberSet>,
    pool: ThreadPool,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    settings: AggregatorSettings,
    logger: Logger,
}

impl FleetTelemetryAggregator {
    pub fn new(
        registry: Arc<dyn FleetRegistry>,
        transport: Arc<dyn VehicleTransport>,
        subscribers: Arc<SubscriberSet>,
        settings: AggregatorSettings,
        logger: Logger,
    ) -> Self {
        let pool = ThreadPool::with_name("telemetry-poll".to_string(), settings.workers.max(1));
        FleetTelemetryAggregator {
            registry,
            transport,
            subscribers,
            pool,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            settings,
            logger,
        }
    }

    pub fn subscribers(&self) -> &Arc<SubscriberSet> {
        &self.subscribers
    }

    /// Queries every vehicle concurrently and builds the id to entry map.
    ///
    /// Every registered id gets an entry. A vehicle that failed, did not
    /// answer before the round deadline, or is still busy with an earlier
    /// poll gets the error marker. At most one poll per vehicle is ever
    /// queued, so a slow vehicle cannot starve the others.
    pub fn collect_round(&self) -> Result<FleetTelemetryFrame, FleetError> {
        let records = self.registry.list()?;
        let deadline = Instant::now() + self.settings.round_deadline;

        let mut frame: FleetTelemetryFrame = records
            .iter()
            .map(|record| (record.id, FleetTelemetryEntry::failed()))
            .collect();

        if records.len() > self.pool.max_count() {
            // Clones share one pool, so this resizes the aggregator's own.
            let mut pool = self.pool.clone();
            pool.set_num_threads(records.len());
        }

        let (tx, rx) = mpsc::channel();
        for record in &records {
            let id = record.id;
            if !self.in_flight.lock()?.insert(id) {
                self.logger
                    .debug(&format!("Drone {} is still answering an earlier poll", id))
                    .ok();
                continue;
            }
            let guard = InFlight {
                ids: Arc::clone(&self.in_flight),
                id,
            };
            let tx = tx.clone();
            let transport = Arc::clone(&self.transport);
            let address = record.address.clone();
            self.pool.execute(move || {
                let result = transport.status(&address);
                drop(guard);
                // The round may already be over; a closed channel is expected then.
                tx.send((id, result)).ok();
            });
        }
        drop(tx);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((id, Ok(snapshot))) => {
                    if let Some(entry) = self.record_report(id, snapshot) {
                        frame.insert(id, entry);
                    }
                }
                Ok((id, Err(e))) => {
                    self.logger
                        .debug(&format!("Telemetry poll of drone {} failed: {}", id, e))
                        .ok();
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(frame)
    }

    fn record_report(&self, id: u64, snapshot: VehicleSnapshot) -> Option<FleetTelemetryEntry> {
        let update = RecordUpdate {
            status: Some(VehicleStatus::from_flying(snapshot.is_flying)),
            latitude: Some(snapshot.latitude),
            longitude: Some(snapshot.longitude),
            altitude: Some(snapshot.altitude),
            battery_level: Some(snapshot.battery),
        };
        match self.registry.update(id, update) {
            Ok(record) => Some(reported(&record, snapshot)),
            Err(e) => {
                self.logger
                    .warn(&format!("Could not cache telemetry of drone {}: {}", id, e), false)
                    .ok();
                None
            }
        }
    }

    /// Runs one poll-and-broadcast cycle.
    pub fn run_round(&self) -> Result<RoundReport, FleetError> {
        let frame = self.collect_round()?;

        let bytes = encode_line(&frame)?;
        let broadcast = self.subscribers.broadcast(&bytes)?;

        let failed = frame.values().filter(|entry| entry.is_error()).count();
        self.logger
            .debug(&format!(
                "Round: {} drones, {} failed, {} subscribers",
                frame.len(),
                failed,
                broadcast.delivered
            ))
            .ok();
        for id in &broadcast.dropped {
            self.logger
                .info(&format!("Dropped telemetry subscriber {}", id), Color::Magenta, true)
                .ok();
        }

        Ok(RoundReport { frame, broadcast })
    }

    /// Runs rounds every `poll_interval` on a dedicated thread until `running` is cleared.
    pub fn start(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>, FleetError> {
        let handle = thread::Builder::new()
            .name("aggregator".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    if let Err(e) = self.run_round() {
                        self.logger
                            .error(&format!("Aggregation round failed: {}", e), true)
                            .ok();
                    }
                    while running.load(Ordering::SeqCst)
                        && started.elapsed() < self.settings.poll_interval
                    {
                        let left = self.settings.poll_interval.saturating_sub(started.elapsed());
                        thread::sleep(left.min(Duration::from_millis(STOP_POLL_MILLIS)));
                    }
                }
                self.pool.join();
            })?;
        Ok(handle)
    }
}

fn reported(record: &FleetVehicleRecord, snapshot: VehicleSnapshot) -> FleetTelemetryEntry {
    FleetTelemetryEntry::Reported {
        name: record.name.clone(),
        status: snapshot,
        current_lat: record.current_lat,
        current_lng: record.current_lng,
        current_altitude: record.current_altitude,
        battery_level: record.battery_level,
        max_speed: record.max_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, VehicleAddress};
    use crate::relay::tests::{register_request, snapshot, FakeTransport};
    use crate::relay::VehicleCommand;
    use drone_protocol::messages::CommandReply;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl TelemetrySink for RecordingSink {
        fn send(&self, frame: &[u8]) -> io::Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct BrokenSink;

    impl TelemetrySink for BrokenSink {
        fn send(&self, _frame: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    /// Answers status queries only after a delay.
    struct SlowTransport {
        delay: Duration,
        polls: AtomicU64,
    }

    impl SlowTransport {
        fn new(delay: Duration) -> Self {
            SlowTransport {
                delay,
                polls: AtomicU64::new(0),
            }
        }
    }

    impl VehicleTransport for SlowTransport {
        fn command(
            &self,
            _address: &VehicleAddress,
            _command: &VehicleCommand,
        ) -> Result<CommandReply, FleetError> {
            Ok(CommandReply::success("ok"))
        }

        fn status(&self, _address: &VehicleAddress) -> Result<VehicleSnapshot, FleetError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(snapshot(true, 0.0))
        }
    }

    fn settings() -> AggregatorSettings {
        AggregatorSettings {
            poll_interval: Duration::from_millis(30),
            round_deadline: Duration::from_millis(500),
            workers: 4,
        }
    }

    fn aggregator(
        registry: Arc<MemoryRegistry>,
        transport: Arc<dyn VehicleTransport>,
        settings: AggregatorSettings,
    ) -> FleetTelemetryAggregator {
        FleetTelemetryAggregator::new(
            registry,
            transport,
            Arc::new(SubscriberSet::new()),
            settings,
            Logger::console("aggregator-test"),
        )
    }

    #[test]
    fn test_round_with_one_unreachable_vehicle() {
        let transport = Arc::new(FakeTransport::default());
        {
            let mut snapshots = transport.snapshots.lock().unwrap();
            snapshots.insert(9001, snapshot(true, 1.0));
            snapshots.insert(9002, snapshot(false, 2.0));
        }
        let registry = Arc::new(MemoryRegistry::new());
        for (name, port) in [("alpha", 9001), ("beta", 9002), ("ghost", 9003)] {
            registry.insert(register_request(name, port)).unwrap();
        }

        let frame = aggregator(registry.clone(), transport, settings())
            .collect_round()
            .unwrap();

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.values().filter(|e| e.is_error()).count(), 1);
        assert_eq!(frame[&3], FleetTelemetryEntry::failed());

        match &frame[&1] {
            FleetTelemetryEntry::Reported {
                name,
                status,
                current_lat,
                battery_level,
                ..
            } => {
                assert_eq!(name, "alpha");
                assert!(status.is_flying);
                assert_eq!(*current_lat, Some(1.0));
                assert_eq!(*battery_level, 88.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(registry.get(1).unwrap().status, VehicleStatus::Flying);
        assert_eq!(registry.get(2).unwrap().status, VehicleStatus::Stopped);
        assert_eq!(registry.get(2).unwrap().current_lat, Some(2.0));
        assert_eq!(registry.get(3).unwrap().current_lat, None);
    }

    #[test]
    fn test_vehicle_slower_than_the_deadline_is_marked_failed() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(register_request("slow", 9001)).unwrap();

        let mut short = settings();
        short.round_deadline = Duration::from_millis(50);
        let started = Instant::now();
        let frame = aggregator(
            registry.clone(),
            Arc::new(SlowTransport::new(Duration::from_millis(400))),
            short,
        )
        .collect_round()
        .unwrap();

        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(frame[&1], FleetTelemetryEntry::failed());
        assert_eq!(registry.get(1).unwrap().current_lat, None);
    }

    #[test]
    fn test_more_vehicles_than_workers_all_report_every_round() {
        let registry = Arc::new(MemoryRegistry::new());
        for port in 9001..9007 {
            registry.insert(register_request("scout", port)).unwrap();
        }
        let settings = AggregatorSettings {
            poll_interval: Duration::from_millis(300),
            round_deadline: Duration::from_millis(300),
            workers: 2,
        };
        let aggregator = aggregator(
            registry,
            Arc::new(SlowTransport::new(Duration::from_millis(100))),
            settings,
        );

        for round in 0..4 {
            let frame = aggregator.collect_round().unwrap();
            assert_eq!(frame.len(), 6);
            let failed = frame.values().filter(|e| e.is_error()).count();
            assert_eq!(failed, 0, "round {} had {} failures", round, failed);
        }
    }

    #[test]
    fn test_busy_vehicle_is_not_polled_twice() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(register_request("slow", 9001)).unwrap();
        let transport = Arc::new(SlowTransport::new(Duration::from_millis(400)));

        let mut short = settings();
        short.round_deadline = Duration::from_millis(50);
        let aggregator = aggregator(registry, transport.clone(), short);

        for _ in 0..3 {
            let frame = aggregator.collect_round().unwrap();
            assert_eq!(frame[&1], FleetTelemetryEntry::failed());
        }
        assert_eq!(transport.polls.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(450));
        aggregator.collect_round().unwrap();
        assert_eq!(transport.polls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cadence_holds_with_one_slow_vehicle() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(register_request("slow", 9001)).unwrap();
        let settings = AggregatorSettings {
            poll_interval: Duration::from_millis(100),
            round_deadline: Duration::from_millis(100),
            workers: 1,
        };
        let aggregator = aggregator(
            registry,
            Arc::new(SlowTransport::new(Duration::from_millis(1000))),
            settings,
        );
        let sink = Arc::new(RecordingSink::default());
        aggregator.subscribers().add(sink.clone()).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let handle = aggregator.start(running.clone()).unwrap();
        thread::sleep(Duration::from_millis(560));
        running.store(false, Ordering::SeqCst);
        let rounds = sink.frames.lock().unwrap().len();
        handle.join().expect("aggregator thread exits");

        assert!(rounds >= 4, "only {} rounds in 560 ms", rounds);
    }

    #[test]
    fn test_channel_sink_fails_when_full_or_closed() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let sink = ChannelSink::new(tx);

        sink.send(b"{}\n").unwrap();
        let full = sink.send(b"{}\n").unwrap_err();
        assert_eq!(full.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(rx.try_recv().unwrap(), b"{}\n".to_vec());
        drop(rx);
        let closed = sink.send(b"{}\n").unwrap_err();
        assert_eq!(closed.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closed_set_refuses_subscribers() {
        let subscribers = SubscriberSet::new();
        subscribers.add(Arc::new(RecordingSink::default())).unwrap();

        assert_eq!(subscribers.close().unwrap(), 1);
        assert_eq!(subscribers.len().unwrap(), 0);
        assert!(matches!(
            subscribers.add(Arc::new(RecordingSink::default())),
            Err(FleetError::ShuttingDown)
        ));
    }

    #[test]
    fn test_empty_fleet_still_broadcasts() {
        let aggregator = aggregator(
            Arc::new(MemoryRegistry::new()),
            Arc::new(FakeTransport::default()),
            settings(),
        );
        let sink = Arc::new(RecordingSink::default());
        aggregator.subscribers().add(sink.clone()).unwrap();

        let report = aggregator.run_round().unwrap();

        assert!(report.frame.is_empty());
        assert_eq!(sink.frames.lock().unwrap().as_slice(), &[b"{}\n".to_vec()]);
    }

    #[test]
    fn test_failed_subscriber_is_removed_and_others_still_receive() {
        let subscribers = SubscriberSet::new();
        let first = Arc::new(RecordingSink::default());
        let last = Arc::new(RecordingSink::default());
        subscribers.add(first.clone()).unwrap();
        let broken = subscribers.add(Arc::new(BrokenSink)).unwrap();
        subscribers.add(last.clone()).unwrap();

        let report = subscribers.broadcast(b"{}\n").unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![broken]);
        assert!(!subscribers.contains(broken).unwrap());
        assert_eq!(subscribers.len().unwrap(), 2);

        subscribers.broadcast(b"{}\n").unwrap();
        assert_eq!(first.frames.lock().unwrap().len(), 2);
        assert_eq!(last.frames.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_loop_runs_until_stopped() {
        let transport = Arc::new(FakeTransport::default());
        transport
            .snapshots
            .lock()
            .unwrap()
            .insert(9001, snapshot(true, 1.0));
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(register_request("alpha", 9001)).unwrap();

        let aggregator = aggregator(registry, transport.clone(), settings());
        let sink = Arc::new(RecordingSink::default());
        aggregator.subscribers().add(sink.clone()).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let handle = aggregator.start(running.clone()).unwrap();
        thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("aggregator thread exits");

        let frames = sink.frames.lock().unwrap();
        assert!(frames.len() >= 2, "got {} rounds", frames.len());
        let decoded: FleetTelemetryFrame =
            serde_json::from_slice(&frames[0][..frames[0].len() - 1]).unwrap();
        assert!(!decoded[&1].is_error());
    }
}
