//! # Relay Runtime Module
//!
//! Wires acquisition, the normalization pipeline, local broadcast, the
//! point-query endpoint, the offline queue and the upstream relay into one
//! running process.
//!
//! ## Lifecycle
//!
//! 1. Load configuration: `RelayRuntime::load(Some("config.json"))`
//! 2. Start: `runtime.run().await` binds listeners and spawns every component
//! 3. Stop gracefully: `runtime.stop()` from any thread
//!
//! ## Example
//!
//! ```ignore
//! let runtime = RelayRuntime::load(Some(Path::new("config.json")))?;
//! let stopper = Arc::clone(&runtime);
//! ctrlc::set_handler(move || stopper.stop())?;
//! runtime.run().await?;
//! ```

pub mod config;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{error, info, warn};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::acquisition::{AcquisitionLoop, GpsdSource};
use crate::broadcast::LocalBroadcastServer;
use crate::error::{ConfigError, RuntimeError};
use crate::logging::AuditLog;
use crate::pipeline::{CompletenessGate, FixIdentity, Pipeline, ReportNormalizer, StalenessWatchdog};
use crate::queue::OfflineQueue;
use crate::relay;
use crate::router::DistributionRouter;
use crate::transport::{bind_listener, WsConnector};
use config::PipelineConfig;

pub struct RelayRuntime {
    config: PipelineConfig,
    device_id: String,
    running: Arc<AtomicBool>,
    shutdown: Notify,
    broadcast: Arc<LocalBroadcastServer>,
    queue: Arc<OfflineQueue>,
}

impl RelayRuntime {
    /// Load the config at `config_path`, or run on defaults when `None`.
    pub fn load(config_path: Option<&Path>) -> Result<Arc<Self>, ConfigError> {
        let config = match config_path {
            Some(path) => {
                info!(target: "runtime", "Loading config from {}", path.display());
                PipelineConfig::load(path)?
            }
            None => {
                info!(target: "runtime", "No config given, using defaults");
                PipelineConfig::default()
            }
        };
        Ok(Self::new(config))
    }

    pub fn new(config: PipelineConfig) -> Arc<Self> {
        let device_id = config.resolve_device_id();
        let queue = Arc::new(OfflineQueue::new(&config.storage.offline_file));
        let broadcast = Arc::new(LocalBroadcastServer::new().with_keepalive(config.websocket.keepalive()));
        Arc::new(RelayRuntime {
            config,
            device_id,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Notify::new(),
            broadcast,
            queue,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn broadcast(&self) -> Arc<LocalBroadcastServer> {
        Arc::clone(&self.broadcast)
    }

    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn build_pipeline(&self) -> Pipeline {
        let config = &self.config;
        let identity = FixIdentity {
            ship_id: config.ship_id.clone(),
            device_id: self.device_id.clone(),
        };
        let watchdog = StalenessWatchdog::new(
            Duration::from_secs(config.watchdog.data_timeout_secs),
            config.watchdog.invalidate_stale,
            Instant::now(),
        );
        Pipeline::new(
            ReportNormalizer::new(config.bindings(), config.debounce()),
            CompletenessGate::new(identity, config.gate.emission),
        )
        .with_watchdog(watchdog)
        .with_partial_broadcast(config.gate.broadcast_partial)
    }

    fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener, RuntimeError> {
        bind_listener(addr).map_err(|source| RuntimeError::Bind { addr, source })
    }

    /// Start every component and wait for [`stop`](Self::stop), or for
    /// acquisition to end on its own.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let config = &self.config;
        info!(
            target: "runtime",
            "Starting GPS relay for ship {} (device {})",
            config.ship_id,
            self.device_id
        );

        let broadcast_listener = Self::bind(config.broadcast_addr()?)?;
        let http_listener = match config.http_addr()? {
            Some(addr) => Some(Self::bind(addr)?),
            None => None,
        };
        let audit = Arc::new(AuditLog::create(&config.storage.data_dir, Local::now())?);

        match self.queue.clean().await {
            Ok(report) if report.kept > 0 => {
                info!(target: "runtime", "{} offline entries waiting for upstream", report.kept)
            }
            Ok(_) => {}
            Err(e) => warn!(target: "runtime", "Could not inspect offline queue: {}", e),
        }

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(self.broadcast().serve(broadcast_listener)));

        if let Some(listener) = http_listener {
            let broadcast = self.broadcast();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::http::serve(listener, broadcast).await {
                    error!(target: "http", "Point-query endpoint failed: {}", e);
                }
            }));
        }

        let relay = match &config.upstream {
            Some(upstream) => {
                let connector =
                    WsConnector::new(upstream.address.as_str()).with_keepalive(config.websocket.keepalive());
                let (client, handle) = relay::channel(
                    connector,
                    self.queue(),
                    upstream.reconnect.policy(),
                    Duration::from_millis(upstream.drain_send_delay_ms),
                );
                tasks.push(tokio::spawn(client.run()));
                Some(handle)
            }
            None => {
                info!(target: "runtime", "Upstream relay disabled");
                None
            }
        };

        let (fix_tx, fix_rx) = mpsc::unbounded_channel();
        let router = DistributionRouter::new(self.broadcast(), relay, self.queue());
        let mut router_task = tokio::spawn(router.run(fix_rx));

        let source = GpsdSource::new(&config.gpsd.host, config.gpsd.port);
        let acquisition = AcquisitionLoop::new(source, self.build_pipeline(), fix_tx, Arc::clone(&self.running))
            .with_audit(Arc::clone(&audit))
            .with_reconnect_delay(Duration::from_millis(config.gpsd.reconnect_delay_ms))
            .with_startup_attempts(config.gpsd.startup_attempts)
            .with_check_interval(Duration::from_millis(config.watchdog.check_interval_ms));
        if let Err(e) = acquisition.spawn() {
            router_task.abort();
            tasks.iter().for_each(JoinHandle::abort);
            audit.close();
            return Err(e.into());
        }

        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = &mut router_task => {
                warn!(target: "runtime", "Acquisition ended, shutting down");
            }
        }

        info!(target: "runtime", "Shutting down");
        self.running.store(false, Ordering::SeqCst);
        router_task.abort();
        for task in &tasks {
            task.abort();
        }
        audit.close();
        Ok(())
    }

    /// Ask a running [`run`](Self::run) to return. Safe to call from any
    /// thread, including before `run` starts waiting.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}
