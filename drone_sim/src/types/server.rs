use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::Router;
use logger::{Color, Logger};
use tokio::sync::oneshot;

use super::control::{self, ControlState};
use super::motion::TickOutcome;
use super::sim_error::SimError;
use super::timer::Timer;
use super::vehicle::Vehicle;
use super::TICK_FREQUENCY_MILLIS;

const HTTP_WORKERS: usize = 2;

/// HTTP front of one simulated vehicle.
///
/// A bound server owns the listening socket and the vehicle. Nothing runs
/// until `start`, which spawns the physics tick and the HTTP runtime.
pub struct DroneServer {
    listener: TcpListener,
    vehicle: Vehicle,
    logger: Logger,
}

impl DroneServer {
    pub fn bind(addr: &str, vehicle: Vehicle, logger: Logger) -> Result<Self, SimError> {
        let listener = TcpListener::bind(addr)?;
        Ok(DroneServer {
            listener,
            vehicle,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SimError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> Result<ServerHandle, SimError> {
        let local_addr = self.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let timer = Timer::new(Duration::from_millis(TICK_FREQUENCY_MILLIS));
        let ticker = Arc::clone(&timer).start(
            "physics",
            physics_tick(self.vehicle.clone(), self.logger.scoped("physics")),
        )?;

        let app = control::router(ControlState {
            vehicle: self.vehicle.clone(),
            running: Arc::clone(&running),
            logger: self.logger.scoped("http"),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let http = match serve_in_background(self.listener, app, shutdown_rx) {
            Ok(http) => http,
            Err(e) => {
                timer.stop();
                return Err(e);
            }
        };

        self.logger
            .info(&format!("Listening on {}", local_addr), Color::Green, true)
            .ok();

        Ok(ServerHandle {
            local_addr,
            vehicle: self.vehicle,
            logger: self.logger,
            running,
            timer,
            ticker: Some(ticker),
            http: Some(http),
            shutdown: Some(shutdown_tx),
        })
    }
}

/// Controls a running `DroneServer`.
pub struct ServerHandle {
    local_addr: SocketAddr,
    vehicle: Vehicle,
    logger: Logger,
    running: Arc<AtomicBool>,
    timer: Arc<Timer>,
    ticker: Option<JoinHandle<()>>,
    http: Option<JoinHandle<io::Result<()>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    /// Freezes the physics tick. Commands are still applied.
    pub fn pause_physics(&self) {
        self.timer.pause();
    }

    pub fn resume_physics(&self) {
        self.timer.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.timer.is_paused()
    }

    pub fn ticks(&self) -> u64 {
        self.timer.ticks()
    }

    /// Blocks until the HTTP server exits.
    pub fn wait(mut self) -> Result<(), SimError> {
        if let Some(http) = self.http.take() {
            join_http(http)?;
        }
        self.shutdown()
    }

    /// Stops accepting, ends every open stream and joins all threads.
    pub fn shutdown(mut self) -> Result<(), SimError> {
        self.running.store(false, Ordering::SeqCst);
        self.timer.stop();

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(http) = self.http.take() {
            join_http(http)?;
        }
        if let Some(ticker) = self.ticker.take() {
            ticker
                .join()
                .map_err(|_| SimError::ThreadJoinError("physics".to_string()))?;
        }

        self.logger.info("Server stopped", Color::Yellow, true).ok();
        Ok(())
    }
}

/// Serves `app` from a dedicated thread that owns its own runtime.
///
/// After `shutdown` fires the server stops accepting and drains open
/// requests and streams before the thread exits.
fn serve_in_background(
    listener: TcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
) -> Result<JoinHandle<io::Result<()>>, SimError> {
    listener.set_nonblocking(true)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(HTTP_WORKERS)
        .thread_name("drone-http")
        .enable_all()
        .build()?;

    let handle = thread::Builder::new()
        .name("http".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        shutdown.await.ok();
                    })
                    .await
            })
        })?;
    Ok(handle)
}

fn join_http(http: JoinHandle<io::Result<()>>) -> Result<(), SimError> {
    http.join()
        .map_err(|_| SimError::ThreadJoinError("http".to_string()))??;
    Ok(())
}

fn physics_tick(vehicle: Vehicle, logger: Logger) -> impl FnMut(u64) + Send + 'static {
    move |_tick| match vehicle.tick() {
        Ok(TickOutcome::Arrived) => {
            if let Ok(snapshot) = vehicle.snapshot() {
                logger
                    .info(
                        &format!(
                            "Arrived at lat: {:?}, lon: {:?}, alt: {:?}",
                            snapshot.latitude, snapshot.longitude, snapshot.altitude
                        ),
                        Color::Cyan,
                        true,
                    )
                    .ok();
            }
        }
        Ok(_) => {}
        Err(e) => {
            logger.error(&format!("Tick failed: {}", e), true).ok();
        }
    }
}
