use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drone_protocol::ndjson::encode_line;
use logger::{Color, Logger};
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use super::sim_error::SimError;
use super::vehicle::Vehicle;

/// Encodes snapshots for a single subscriber.
///
/// Dropping the feed is how a stream ends, whether the subscriber went away
/// or the server is shutting down, so the drop is where it gets logged.
pub struct SnapshotFeed {
    vehicle: Vehicle,
    logger: Logger,
    frames_sent: u64,
}

impl SnapshotFeed {
    pub fn new(vehicle: Vehicle, logger: Logger) -> Self {
        SnapshotFeed {
            vehicle,
            logger,
            frames_sent: 0,
        }
    }

    /// One snapshot as a JSON line.
    pub fn next_frame(&mut self) -> Result<Vec<u8>, SimError> {
        let snapshot = self.vehicle.snapshot()?;
        let frame = encode_line(&snapshot)?;
        self.frames_sent += 1;
        Ok(frame)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

impl Drop for SnapshotFeed {
    fn drop(&mut self) {
        self.logger
            .info(
                &format!("Telemetry stream closed after {} frames", self.frames_sent),
                Color::Cyan,
                false,
            )
            .ok();
    }
}

/// Yields one frame every `period` until `running` is cleared.
///
/// A subscriber that stops reading gets its body dropped by the server,
/// which drops this stream and nothing else. Must be called inside a tokio
/// runtime.
pub fn snapshot_stream(
    mut feed: SnapshotFeed,
    running: Arc<AtomicBool>,
    period: Duration,
) -> impl Stream<Item = Result<Vec<u8>, SimError>> + Send + 'static {
    let mut ticks = time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    IntervalStream::new(ticks)
        .take_while(move |_| running.load(Ordering::SeqCst))
        .map(move |_| feed.next_frame())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drone_protocol::messages::VehicleSnapshot;
    use drone_protocol::ndjson::decode_line;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("test runtime")
    }

    #[test]
    fn test_feed_encodes_one_snapshot_per_line() {
        let vehicle = Vehicle::default();
        vehicle.takeoff(30.0).expect("takeoff");
        let mut feed = SnapshotFeed::new(vehicle.clone(), Logger::console("test"));

        for _ in 0..3 {
            let frame = feed.next_frame().expect("frame");
            assert_eq!(frame.last(), Some(&b'\n'));
            let snapshot: VehicleSnapshot =
                decode_line(std::str::from_utf8(&frame).unwrap()).expect("frame is a snapshot");
            assert!(snapshot.is_flying);
            assert_eq!(snapshot.altitude, 30.0);
        }
        assert_eq!(feed.frames_sent(), 3);
        drop(feed);

        // The vehicle is still usable after its subscriber went away.
        assert!(vehicle.land().is_ok());
    }

    #[test]
    fn test_stream_ends_once_running_is_cleared() {
        let vehicle = Vehicle::default();
        let running = Arc::new(AtomicBool::new(true));

        let (first, rest) = runtime().block_on(async {
            let feed = SnapshotFeed::new(vehicle, Logger::console("test"));
            let mut frames =
                Box::pin(snapshot_stream(feed, Arc::clone(&running), Duration::from_millis(5)));

            let mut first = Vec::new();
            for _ in 0..3 {
                first.push(frames.next().await.expect("frame while running"));
            }
            running.store(false, Ordering::SeqCst);
            let rest: Vec<_> = frames.collect().await;
            (first, rest)
        });

        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|frame| frame.is_ok()));
        assert!(rest.is_empty());
    }
}
