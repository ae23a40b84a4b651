use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::SourceTag;

/// Rendering used for every timestamp that leaves the process.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Per-source part of a [`Fix`].
///
/// Scalars decode as `None` when absent so that entries written by older
/// processes still parse and can be re-validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub gps: SourceTag,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub satellites: Option<u32>,
    #[serde(default)]
    pub satellite_prns: Vec<String>,
}

impl SourceSnapshot {
    pub fn empty(gps: SourceTag) -> Self {
        SourceSnapshot {
            gps,
            latitude: None,
            longitude: None,
            altitude: None,
            speed: None,
            satellites: None,
            satellite_prns: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.altitude.is_some()
            && self.speed.is_some()
            && self.satellites.is_some()
    }
}

/// A paired positional record from both receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub ship_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub gps_data: Vec<SourceSnapshot>,
}

impl Fix {
    pub fn snapshot(&self, tag: SourceTag) -> Option<&SourceSnapshot> {
        self.gps_data.iter().find(|s| s.gps == tag)
    }

    /// Every declared source is present, and every snapshot carried has
    /// all of its required scalars.
    ///
    /// Only complete fixes may be relayed upstream or persisted offline.
    pub fn is_complete(&self) -> bool {
        SourceTag::ALL.iter().all(|tag| self.snapshot(*tag).is_some())
            && self.gps_data.iter().all(SourceSnapshot::is_complete)
    }

    /// Same readings as `other`, ignoring when they were taken.
    pub fn same_reading(&self, other: &Fix) -> bool {
        self.heading == other.heading && self.gps_data == other.gps_data
    }
}
