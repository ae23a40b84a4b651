//! Human-readable rendering of a [`Fix`] for the audit trail, and the
//! tolerant parser that reads such blocks back.
//!
//! The parser never fails: the `Unknown` sentinel and unparseable numbers
//! both resolve to `None`. The latter is logged as data-quality loss.

use std::fmt::Write as _;
use std::str::FromStr;

use log::warn;

use crate::model::{Fix, SourceSnapshot, SourceTag};

pub const UNKNOWN: &str = "Unknown";
pub const BLOCK_SEPARATOR: &str = "---------------------------";

fn or_unknown<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| v.to_string())
}

pub fn render_fix(fix: &Fix) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "GPS Data (Real-Time): {}", fix.timestamp);
    let _ = writeln!(out, "Ship ID: {}", fix.ship_id);
    let _ = writeln!(out, "Device ID: {}", fix.device_id);
    let _ = writeln!(out, "Heading: {}", or_unknown(fix.heading));

    for tag in SourceTag::ALL {
        let empty = SourceSnapshot::empty(tag);
        let snap = fix.snapshot(tag).unwrap_or(&empty);
        let prns = if snap.satellite_prns.is_empty() {
            UNKNOWN.to_string()
        } else {
            snap.satellite_prns.join(", ")
        };
        let _ = writeln!(out, "{}:", tag.label());
        let _ = writeln!(out, "  Latitude: {}", or_unknown(snap.latitude));
        let _ = writeln!(out, "  Longitude: {}", or_unknown(snap.longitude));
        let _ = writeln!(out, "  Altitude (m): {}", or_unknown(snap.altitude));
        let _ = writeln!(out, "  Speed (km/h): {}", or_unknown(snap.speed));
        let _ = writeln!(out, "  Satellites: {}", or_unknown(snap.satellites));
        let _ = writeln!(out, "  Satellite PRNs: {}", prns);
    }
    out.push_str(BLOCK_SEPARATOR);
    out.push('\n');
    out
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() || raw == UNKNOWN {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "normalizer", "Discarding unparseable {} value '{}'", field, raw);
            None
        }
    }
}

fn value_after_colon(line: &str) -> &str {
    line.split_once(':').map_or("", |(_, v)| v.trim())
}

/// Rebuild a fix from its text rendering.
///
/// Lines that do not belong to a known field are ignored; per-source lines
/// that appear before any source header are ignored too.
pub fn parse_fix_text(text: &str) -> Fix {
    let mut fix = Fix {
        timestamp: String::new(),
        ship_id: String::new(),
        device_id: String::new(),
        heading: None,
        gps_data: SourceTag::ALL.iter().map(|t| SourceSnapshot::empty(*t)).collect(),
    };
    let mut current: Option<usize> = None;

    for line in text.lines().map(str::trim) {
        if line.starts_with("GPS Data (Real-Time):") {
            fix.timestamp = value_after_colon(line).to_string();
        } else if line.starts_with("Ship ID:") {
            fix.ship_id = value_after_colon(line).to_string();
        } else if line.starts_with("Device ID:") {
            fix.device_id = value_after_colon(line).to_string();
        } else if line.starts_with("Heading:") {
            fix.heading = parse_field("heading", value_after_colon(line));
        } else if line.starts_with(SourceTag::Top.label()) {
            current = Some(SourceTag::Top.index());
        } else if line.starts_with(SourceTag::Bottom.label()) {
            current = Some(SourceTag::Bottom.index());
        } else if let Some(idx) = current {
            let snap = &mut fix.gps_data[idx];
            let value = value_after_colon(line);
            if line.starts_with("Latitude:") {
                snap.latitude = parse_field("latitude", value);
            } else if line.starts_with("Longitude:") {
                snap.longitude = parse_field("longitude", value);
            } else if line.starts_with("Altitude (m):") {
                snap.altitude = parse_field("altitude", value);
            } else if line.starts_with("Speed (km/h):") {
                snap.speed = parse_field("speed", value);
            } else if line.starts_with("Satellite PRNs:") {
                snap.satellite_prns = if value.is_empty() || value == UNKNOWN {
                    Vec::new()
                } else {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                };
            } else if line.starts_with("Satellites:") {
                snap.satellites = parse_field("satellites", value);
            }
        }
    }
    fix
}
