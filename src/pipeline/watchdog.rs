use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::gate::CompletenessGate;
use crate::model::SourceTag;

pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Flags sources that have gone quiet for longer than the data timeout.
///
/// A source that never reported counts from the moment the watchdog was
/// created. Each stale episode is reported once.
#[derive(Debug)]
pub struct StalenessWatchdog {
    timeout: Duration,
    invalidate: bool,
    started: Instant,
    stale: HashSet<SourceTag>,
}

impl StalenessWatchdog {
    pub fn new(timeout: Duration, invalidate: bool, started: Instant) -> Self {
        StalenessWatchdog {
            timeout,
            invalidate,
            started,
            stale: HashSet::new(),
        }
    }

    pub fn is_stale(&self, tag: SourceTag) -> bool {
        self.stale.contains(&tag)
    }

    /// Returns the sources that became stale during this check.
    pub fn check(&mut self, gate: &mut CompletenessGate, now: Instant) -> Vec<SourceTag> {
        let mut newly_stale = Vec::new();
        for tag in SourceTag::ALL {
            let last = gate.state(tag).last_seen.unwrap_or(self.started);
            let silent = now.saturating_duration_since(last);

            if silent > self.timeout {
                if self.stale.insert(tag) {
                    warn!(
                        target: "gate",
                        "No data received from {} for {}s",
                        tag,
                        silent.as_secs()
                    );
                    if self.invalidate {
                        gate.invalidate(tag);
                    }
                    newly_stale.push(tag);
                }
            } else if self.stale.remove(&tag) {
                info!(target: "gate", "{} is reporting again", tag);
            }
        }
        newly_stale
    }
}
