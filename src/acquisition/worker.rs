use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use super::source::ReportSource;
use crate::error::SourceError;
use crate::logging::AuditLog;
use crate::model::{Fix, RawReport};
use crate::pipeline::Pipeline;
use crate::relay::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Reads reports on a dedicated thread, runs them through the pipeline and
/// hands emitted fixes to the async side over `fixes`.
pub struct AcquisitionLoop<S: ReportSource> {
    source: S,
    pipeline: Pipeline,
    fixes: mpsc::UnboundedSender<Fix>,
    running: Arc<AtomicBool>,
    audit: Option<Arc<AuditLog>>,
    reconnect_delay: Duration,
    startup_attempts: Option<u32>,
    check_interval: Duration,
    last_check: Instant,
}

impl<S: ReportSource> AcquisitionLoop<S> {
    pub fn new(source: S, pipeline: Pipeline, fixes: mpsc::UnboundedSender<Fix>, running: Arc<AtomicBool>) -> Self {
        AcquisitionLoop {
            source,
            pipeline,
            fixes,
            running,
            audit: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            startup_attempts: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            last_check: Instant::now(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Bound the initial connection to `attempts` tries. Later reconnects
    /// always retry indefinitely.
    pub fn with_startup_attempts(mut self, attempts: Option<u32>) -> Self {
        self.startup_attempts = attempts;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn [`run`](Self::run) on a thread named `acquisition`.
    pub fn spawn(self) -> io::Result<JoinHandle<()>>
    where
        S: 'static,
    {
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
    }

    /// Block until the running flag clears, the fix channel closes, or the
    /// startup attempts run out.
    pub fn run(mut self) {
        match self.connect_initial() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(target: "acquisition", "{}, acquisition stopped", e);
                return;
            }
        }
        while self.is_running() {
            match self.source.next_report() {
                Ok(report) => {
                    if !self.process(&report) {
                        warn!(target: "acquisition", "Fix channel closed, stopping acquisition");
                        return;
                    }
                }
                Err(e) => {
                    error!(target: "acquisition", "Report source error: {}", e);
                    self.reconnect();
                }
            }
        }
        info!(target: "acquisition", "Acquisition stopped");
    }

    /// Feed one report through the pipeline and forward any emitted fix.
    /// Returns false once the receiving side is gone.
    pub fn process(&mut self, report: &RawReport) -> bool {
        let now = Instant::now();
        let emitted = self.pipeline.ingest_at(report, now, Utc::now());

        if now.duration_since(self.last_check) >= self.check_interval {
            self.pipeline.check_staleness(now);
            self.last_check = now;
        }

        let Some(fix) = emitted else {
            return true;
        };
        if fix.is_complete() {
            if let Some(audit) = &self.audit {
                audit.record(&fix);
            }
            debug!(target: "acquisition", "Emitted fix {}", fix.timestamp);
        }
        self.fixes.send(fix).is_ok()
    }

    /// `Ok(false)` when stopped before a connection was made.
    fn connect_initial(&mut self) -> Result<bool, SourceError> {
        let mut policy = ReconnectPolicy::fixed(self.reconnect_delay);
        if let Some(attempts) = self.startup_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        while self.is_running() {
            match self.source.reconnect() {
                Ok(()) => return Ok(true),
                Err(e) => {
                    error!(target: "acquisition", "Error connecting to report source: {}", e);
                    match policy.next_delay() {
                        Some(delay) => thread::sleep(delay),
                        None => return Err(SourceError::AttemptsExhausted(policy.attempts())),
                    }
                }
            }
        }
        Ok(false)
    }

    fn reconnect(&mut self) {
        while self.is_running() {
            thread::sleep(self.reconnect_delay);
            match self.source.reconnect() {
                Ok(()) => {
                    info!(target: "acquisition", "Reconnected to report source");
                    return;
                }
                Err(e) => error!(target: "acquisition", "Error reconnecting to report source: {}", e),
            }
        }
    }
}
