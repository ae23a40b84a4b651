use serde::Deserialize;

/// One report as delivered by gpsd's JSON watch stream.
///
/// Only the classes the pipeline consumes are modelled; everything else
/// (VERSION, DEVICES, WATCH, ...) decodes as [`RawReport::Other`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "class")]
pub enum RawReport {
    #[serde(rename = "TPV")]
    Position(PositionReport),
    #[serde(rename = "SKY")]
    Sky(SkyReport),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportClass {
    Position,
    Sky,
}

impl RawReport {
    pub fn class(&self) -> Option<ReportClass> {
        match self {
            RawReport::Position(_) => Some(ReportClass::Position),
            RawReport::Sky(_) => Some(ReportClass::Sky),
            RawReport::Other => None,
        }
    }

    pub fn device(&self) -> Option<&str> {
        match self {
            RawReport::Position(p) => p.device.as_deref(),
            RawReport::Sky(s) => s.device.as_deref(),
            RawReport::Other => None,
        }
    }
}

/// Time-position-velocity report. Speed is in m/s, track in degrees.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PositionReport {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub alt: Option<f64>,
    /// Newer gpsd releases drop `alt` in favour of `altMSL`.
    #[serde(default, rename = "altMSL")]
    pub alt_msl: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub track: Option<f64>,
}

impl PositionReport {
    pub fn altitude(&self) -> Option<f64> {
        self.alt.or(self.alt_msl)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SkyReport {
    #[serde(default)]
    pub device: Option<String>,
    /// Absent on reports that only carry precision figures
    #[serde(default)]
    pub satellites: Option<Vec<Satellite>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Satellite {
    #[serde(default, rename = "PRN")]
    pub prn: Option<u32>,
    #[serde(default)]
    pub used: bool,
}

impl SkyReport {
    /// Satellites flagged as used in the current solution.
    pub fn used(&self) -> impl Iterator<Item = &Satellite> {
        self.satellites.iter().flatten().filter(|s| s.used)
    }
}
