use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::Router;
use logger::{Color, Logger};
use tokio::sync::oneshot;

use crate::aggregator::{AggregatorSettings, FleetTelemetryAggregator, SubscriberSet};
use crate::block_areas::BlockAreaRegistry;
use crate::config::FleetConfig;
use crate::errors::FleetError;
use crate::registry::{FleetRegistry, MemoryRegistry};
use crate::relay::{FleetCommandRelay, HttpTransport, VehicleTransport};
use crate::routes::{self, FleetService};

const HTTP_WORKERS: usize = 4;

/// HTTP front of the fleet: registry, command relay, block areas and the
/// aggregated telemetry stream.
pub struct FleetServer {
    listener: TcpListener,
    service: Arc<FleetService>,
    aggregator: FleetTelemetryAggregator,
    logger: Logger,
}

impl FleetServer {
    /// Binds with an in-memory registry and HTTP calls to the vehicles.
    pub fn bind(config: &FleetConfig, logger: Logger) -> Result<Self, FleetError> {
        FleetServer::bind_with(
            &config.bind_addr,
            Arc::new(MemoryRegistry::new()),
            Arc::new(HttpTransport::new(config.request_timeout)?),
            config.aggregator_settings(),
            logger,
        )
    }

    pub fn bind_with(
        addr: &str,
        registry: Arc<dyn FleetRegistry>,
        transport: Arc<dyn VehicleTransport>,
        settings: AggregatorSettings,
        logger: Logger,
    ) -> Result<Self, FleetError> {
        let listener = TcpListener::bind(addr)?;
        let subscribers = Arc::new(SubscriberSet::new());

        let aggregator = FleetTelemetryAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&subscribers),
            settings,
            logger.scoped("aggregator"),
        );
        let service = Arc::new(FleetService {
            relay: FleetCommandRelay::new(registry, transport, logger.scoped("relay")),
            block_areas: BlockAreaRegistry::new(),
            subscribers,
            logger: logger.scoped("http"),
        });

        Ok(FleetServer {
            listener,
            service,
            aggregator,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FleetError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> Result<FleetHandle, FleetError> {
        let local_addr = self.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let aggregator = self.aggregator.start(Arc::clone(&running))?;

        let app = routes::router(Arc::clone(&self.service));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let http = match serve_in_background(self.listener, app, shutdown_rx) {
            Ok(http) => http,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                aggregator.join().ok();
                return Err(e);
            }
        };

        self.logger
            .info(&format!("Fleet server listening on {}", local_addr), Color::Green, true)
            .ok();

        Ok(FleetHandle {
            local_addr,
            service: self.service,
            logger: self.logger,
            running,
            http: Some(http),
            aggregator: Some(aggregator),
            shutdown: Some(shutdown_tx),
        })
    }
}

/// Controls a running `FleetServer`.
pub struct FleetHandle {
    local_addr: SocketAddr,
    service: Arc<FleetService>,
    logger: Logger,
    running: Arc<AtomicBool>,
    http: Option<JoinHandle<io::Result<()>>>,
    aggregator: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FleetHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service(&self) -> &Arc<FleetService> {
        &self.service
    }

    /// Blocks until the HTTP server exits.
    pub fn wait(mut self) -> Result<(), FleetError> {
        if let Some(http) = self.http.take() {
            join_http(http)?;
        }
        self.shutdown()
    }

    /// Stops the aggregation loop, stops accepting, closes every subscriber
    /// stream and joins all threads.
    pub fn shutdown(mut self) -> Result<(), FleetError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        // Open telemetry bodies hold the graceful shutdown until their
        // senders are gone.
        let closed = self.service.subscribers.close()?;

        if let Some(aggregator) = self.aggregator.take() {
            aggregator
                .join()
                .map_err(|_| FleetError::ThreadError("aggregator".to_string()))?;
        }
        if let Some(http) = self.http.take() {
            join_http(http)?;
        }

        self.logger
            .info(
                &format!("Fleet server stopped, closed {} telemetry subscribers", closed),
                Color::Yellow,
                true,
            )
            .ok();
        Ok(())
    }
}

fn serve_in_background(
    listener: TcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
) -> Result<JoinHandle<io::Result<()>>, FleetError> {
    listener.set_nonblocking(true)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(HTTP_WORKERS)
        .thread_name("fleet-http")
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

fn join_http(http: JoinHandle<io::Result<()>>) -> Result<(), FleetError> {
    http.join()
        .map_err(|_| FleetError::ThreadError("http".to_string()))??;
    Ok(())
}
