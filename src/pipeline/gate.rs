use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;

use crate::model::{format_timestamp, Fix, ReportClass, SourceState, SourceTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Partial,
    Complete,
}

/// When a complete gate re-emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionMode {
    /// Every accepted position update while complete.
    #[default]
    Continuous,
    /// As `Continuous`, but a fix equal to the previous one is suppressed.
    OnChange,
}

/// Identifiers stamped on every emitted fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixIdentity {
    pub ship_id: String,
    pub device_id: String,
}

/// Holds the latest state of both sources and emits a [`Fix`] once every
/// required field of every source is known.
///
/// The gate never resets after emitting; a complete gate keeps producing
/// the current best fix on each accepted position update.
#[derive(Debug)]
pub struct CompletenessGate {
    states: [SourceState; 2],
    heading: Option<f64>,
    phase: GatePhase,
    mode: EmissionMode,
    identity: FixIdentity,
    last_emitted: Option<Fix>,
}

impl CompletenessGate {
    pub fn new(identity: FixIdentity, mode: EmissionMode) -> Self {
        CompletenessGate {
            states: Default::default(),
            heading: None,
            phase: GatePhase::Partial,
            mode,
            identity,
            last_emitted: None,
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn state(&self, tag: SourceTag) -> &SourceState {
        &self.states[tag.index()]
    }

    pub fn state_mut(&mut self, tag: SourceTag) -> &mut SourceState {
        &mut self.states[tag.index()]
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn is_complete(&self) -> bool {
        self.states.iter().all(SourceState::is_complete)
    }

    /// Build a fix from the current states, complete or not.
    pub fn snapshot(&self, wall: DateTime<Utc>) -> Fix {
        Fix {
            timestamp: format_timestamp(&wall),
            ship_id: self.identity.ship_id.clone(),
            device_id: self.identity.device_id.clone(),
            heading: self.heading,
            gps_data: SourceTag::ALL
                .iter()
                .map(|tag| self.state(*tag).snapshot(*tag))
                .collect(),
        }
    }

    /// Re-evaluate after `tag` accepted a report of `class`.
    pub fn evaluate(&mut self, tag: SourceTag, class: ReportClass, wall: DateTime<Utc>) -> Option<Fix> {
        if class == ReportClass::Position {
            if let Some(heading) = self.state(tag).heading {
                self.heading = Some(heading);
            }
        }

        if !self.is_complete() {
            self.enter_partial();
            return None;
        }

        match self.phase {
            GatePhase::Partial => {
                self.phase = GatePhase::Complete;
                info!(target: "gate", "All sources complete, emitting fixes");
                self.emit(wall)
            }
            GatePhase::Complete if class == ReportClass::Position => self.emit(wall),
            GatePhase::Complete => None,
        }
    }

    /// Drop everything known about `tag`; the gate falls back to partial.
    pub fn invalidate(&mut self, tag: SourceTag) {
        self.state_mut(tag).invalidate();
        self.enter_partial();
    }

    fn enter_partial(&mut self) {
        if self.phase == GatePhase::Complete {
            info!(target: "gate", "Lost completeness, holding fixes until all sources report");
        }
        self.phase = GatePhase::Partial;
    }

    fn emit(&mut self, wall: DateTime<Utc>) -> Option<Fix> {
        let fix = self.snapshot(wall);
        if self.mode == EmissionMode::OnChange
            && self.last_emitted.as_ref().is_some_and(|prev| prev.same_reading(&fix))
        {
            return None;
        }
        self.last_emitted = Some(fix.clone());
        Some(fix)
    }
}
