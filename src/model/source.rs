use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fix::SourceSnapshot;

/// One of the two physical GPS receivers.
///
/// On the wire the tags are `top_gps` / `bottom_gps`; configuration files
/// may use the short `top` / `bottom` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTag {
    #[serde(rename = "top_gps", alias = "top")]
    Top,
    #[serde(rename = "bottom_gps", alias = "bottom")]
    Bottom,
}

impl SourceTag {
    /// Declared sources, in the order they appear inside a Fix.
    pub const ALL: [SourceTag; 2] = [SourceTag::Top, SourceTag::Bottom];

    pub fn index(self) -> usize {
        match self {
            SourceTag::Top => 0,
            SourceTag::Bottom => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceTag::Top => "Top GPS",
            SourceTag::Bottom => "Bottom GPS",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Top => f.write_str("top_gps"),
            SourceTag::Bottom => f.write_str("bottom_gps"),
        }
    }
}

/// Latest known values for one source, overwritten field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceState {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    /// km/h
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub satellites: Option<u32>,
    pub satellite_prns: Vec<String>,
    /// Wall-clock stamp of the last accepted position update.
    pub updated_at: Option<DateTime<Utc>>,
    /// Monotonic instant of the last report of any class, for staleness checks.
    pub last_seen: Option<Instant>,
}

impl SourceState {
    /// All five required scalars are known.
    pub fn is_complete(&self) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.altitude.is_some()
            && self.speed.is_some()
            && self.satellites.is_some()
    }

    pub fn snapshot(&self, tag: SourceTag) -> SourceSnapshot {
        SourceSnapshot {
            gps: tag,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            speed: self.speed,
            satellites: self.satellites,
            satellite_prns: self.satellite_prns.clone(),
        }
    }

    /// Forget every value. `last_seen` is kept so the watchdog can tell
    /// when the source comes back.
    pub fn invalidate(&mut self) {
        let last_seen = self.last_seen;
        *self = SourceState {
            last_seen,
            ..SourceState::default()
        };
    }
}
