use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::sim_error::SimError;

const PAUSE_POLL_MILLIS: u64 = 10;

/// A fixed-period driver with support for stopping, pausing and resuming.
///
/// The callback runs on a dedicated thread once per period. The time spent in
/// the callback is subtracted from the following sleep so the cadence holds
/// as long as a tick takes less than one period.
pub struct Timer {
    period: Duration,
    ticks: AtomicU64,
    running: AtomicBool,
    paused: AtomicBool,
}

impl Timer {
    /// Creates new timer
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period,
            ticks: AtomicU64::new(0),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        })
    }

    /// Number of callbacks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stops the timer. The thread exits after the current period.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Pauses the timer indefinitely
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes the timer
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Starts the timer thread and executes the callback with the tick count on each tick.
    pub fn start(
        self: Arc<Self>,
        name: &str,
        mut tick_callback: impl FnMut(u64) + Send + 'static,
    ) -> Result<JoinHandle<()>, SimError> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while self.is_running() {
                    if self.is_paused() {
                        thread::sleep(Duration::from_millis(PAUSE_POLL_MILLIS));
                        continue;
                    }

                    let now = Instant::now();
                    let tick_count = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

                    tick_callback(tick_count);

                    let sleep_duration = self.period.saturating_sub(now.elapsed());
                    thread::sleep(sleep_duration);
                }
            })
            .map_err(|e| SimError::TimerStartError(format!("Failed to start {}: {}", name, e)))
    }
}
