//! # Normalization Pipeline
//!
//! Turns the raw report stream into [`Fix`] records.
//!
//! ## Key Types
//!
//! - [`ReportNormalizer`] - unit conversion, rounding, per-source debounce
//! - [`CompletenessGate`] - joint partial/complete state over both sources
//! - [`StalenessWatchdog`] - optional data-timeout layer on top of the gate
//! - [`Pipeline`] - the three wired together for the acquisition loop

pub mod gate;
pub mod normalizer;
pub mod watchdog;

pub use gate::{CompletenessGate, EmissionMode, FixIdentity, GatePhase};
pub use normalizer::{round_to, Normalized, ReportNormalizer, DEFAULT_DEBOUNCE, SPEED_MS_TO_KMH};
pub use watchdog::{StalenessWatchdog, DEFAULT_DATA_TIMEOUT};

use std::time::Instant;

use chrono::{DateTime, Utc};
use log::debug;

use crate::model::{Fix, RawReport, ReportClass};

pub struct Pipeline {
    normalizer: ReportNormalizer,
    gate: CompletenessGate,
    watchdog: Option<StalenessWatchdog>,
    broadcast_partial: bool,
}

impl Pipeline {
    pub fn new(normalizer: ReportNormalizer, gate: CompletenessGate) -> Self {
        Pipeline {
            normalizer,
            gate,
            watchdog: None,
            broadcast_partial: false,
        }
    }

    pub fn with_watchdog(mut self, watchdog: StalenessWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Also hand out incomplete snapshots on position updates, for local display only.
    pub fn with_partial_broadcast(mut self, enabled: bool) -> Self {
        self.broadcast_partial = enabled;
        self
    }

    pub fn gate(&self) -> &CompletenessGate {
        &self.gate
    }

    pub fn ingest(&mut self, report: &RawReport) -> Option<Fix> {
        self.ingest_at(report, Instant::now(), Utc::now())
    }

    /// Feed one report. Returns a fix to distribute, which is complete
    /// unless partial broadcast is enabled.
    pub fn ingest_at(&mut self, report: &RawReport, now: Instant, wall: DateTime<Utc>) -> Option<Fix> {
        let Some(tag) = self.normalizer.resolve(report.device()) else {
            if report.class().is_some() {
                debug!(target: "normalizer", "Ignoring report for unknown device {:?}", report.device());
            }
            return None;
        };

        let state = self.gate.state_mut(tag);
        match self.normalizer.apply(tag, report, state, now, wall) {
            Normalized::Applied { tag, class } => {
                let fix = self.gate.evaluate(tag, class, wall);
                if fix.is_none() && self.broadcast_partial && class == ReportClass::Position && !self.gate.is_complete() {
                    return Some(self.gate.snapshot(wall));
                }
                fix
            }
            Normalized::Debounced(_) | Normalized::Ignored => None,
        }
    }

    pub fn check_staleness(&mut self, now: Instant) {
        if let Some(dog) = self.watchdog.as_mut() {
            dog.check(&mut self.gate, now);
        }
    }
}
