use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;

use crate::model::{PositionReport, RawReport, ReportClass, SkyReport, SourceState, SourceTag};

/// m/s to km/h
pub const SPEED_MS_TO_KMH: f64 = 3.6;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// What the normalizer did with one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalized {
    Applied { tag: SourceTag, class: ReportClass },
    /// Position report inside the debounce window of its source.
    Debounced(SourceTag),
    /// Report class the pipeline does not consume.
    Ignored,
}

/// Maps device reports onto source state, applying unit conversion,
/// rounding and the per-source position debounce.
#[derive(Debug)]
pub struct ReportNormalizer {
    devices: HashMap<String, SourceTag>,
    debounce: Duration,
    last_position: HashMap<SourceTag, Instant>,
}

impl ReportNormalizer {
    pub fn new<I>(bindings: I, debounce: Duration) -> Self
    where
        I: IntoIterator<Item = (String, SourceTag)>,
    {
        ReportNormalizer {
            devices: bindings.into_iter().collect(),
            debounce,
            last_position: HashMap::new(),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn resolve(&self, device: Option<&str>) -> Option<SourceTag> {
        device.and_then(|d| self.devices.get(d).copied())
    }

    /// Apply `report` to `state`, which must be the state of `tag`.
    ///
    /// Only fields present in the report are written.
    pub fn apply(
        &mut self,
        tag: SourceTag,
        report: &RawReport,
        state: &mut SourceState,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Normalized {
        match report {
            RawReport::Position(p) => self.apply_position(tag, p, state, now, wall),
            RawReport::Sky(s) => {
                Self::apply_sky(s, state, now);
                Normalized::Applied { tag, class: ReportClass::Sky }
            }
            RawReport::Other => Normalized::Ignored,
        }
    }

    fn apply_position(
        &mut self,
        tag: SourceTag,
        report: &PositionReport,
        state: &mut SourceState,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Normalized {
        // Liveness is tracked even for debounced reports.
        state.last_seen = Some(now);

        if let Some(prev) = self.last_position.get(&tag) {
            if now.saturating_duration_since(*prev) < self.debounce {
                debug!(target: "normalizer", "Debounced position report for {}", tag);
                return Normalized::Debounced(tag);
            }
        }
        self.last_position.insert(tag, now);

        if let Some(lat) = report.lat {
            state.latitude = Some(lat);
        }
        if let Some(lon) = report.lon {
            state.longitude = Some(lon);
        }
        if let Some(alt) = report.altitude() {
            state.altitude = Some(alt);
        }
        if let Some(speed) = report.speed {
            state.speed = Some(round_to(speed * SPEED_MS_TO_KMH, 2));
        }
        if let Some(track) = report.track {
            state.heading = Some(round_to(track, 1));
        }
        state.updated_at = Some(wall);

        Normalized::Applied { tag, class: ReportClass::Position }
    }

    fn apply_sky(report: &SkyReport, state: &mut SourceState, now: Instant) {
        state.last_seen = Some(now);
        if report.satellites.is_none() {
            debug!(target: "normalizer", "Sky report without satellite list, keeping previous count");
            return;
        }
        let used = report.used().count() as u32;
        // An empty solution is "unknown", never a known zero.
        state.satellites = (used > 0).then_some(used);
        state.satellite_prns = report
            .used()
            .filter_map(|s| s.prn)
            .filter(|prn| *prn != 0)
            .map(|prn| prn.to_string())
            .collect();
        debug!(target: "normalizer", "Source using {} satellites: {:?}", used, state.satellite_prns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Satellite;

    fn normalizer() -> ReportNormalizer {
        ReportNormalizer::new(
            [
                ("/dev/ttyACM0".to_string(), SourceTag::Top),
                ("/dev/ttyACM1".to_string(), SourceTag::Bottom),
            ],
            DEFAULT_DEBOUNCE,
        )
    }

    fn position(lat: f64) -> RawReport {
        RawReport::Position(PositionReport {
            device: Some("/dev/ttyACM0".into()),
            lat: Some(lat),
            lon: Some(10.0),
            alt: Some(20.0),
            speed: Some(1.234),
            track: Some(45.67),
            ..PositionReport::default()
        })
    }

    fn sky(used: &[u32], unused: &[u32]) -> RawReport {
        let mut satellites: Vec<Satellite> = used
            .iter()
            .map(|p| Satellite { prn: Some(*p), used: true })
            .collect();
        satellites.extend(unused.iter().map(|p| Satellite { prn: Some(*p), used: false }));
        RawReport::Sky(SkyReport {
            device: Some("/dev/ttyACM0".into()),
            satellites: Some(satellites),
        })
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(4.44249, 2), 4.44);
        assert_eq!(round_to(45.67, 1), 45.7);
        assert_eq!(round_to(-1.25, 1), -1.3);
    }

    #[test]
    fn test_resolve_device() {
        let n = normalizer();
        assert_eq!(n.resolve(Some("/dev/ttyACM1")), Some(SourceTag::Bottom));
        assert_eq!(n.resolve(Some("/dev/ttyUSB9")), None);
        assert_eq!(n.resolve(None), None);
    }

    #[test]
    fn test_position_conversion() {
        let mut n = normalizer();
        let mut state = SourceState::default();
        let wall = Utc::now();
        let out = n.apply(SourceTag::Top, &position(59.0), &mut state, Instant::now(), wall);

        assert_eq!(out, Normalized::Applied { tag: SourceTag::Top, class: ReportClass::Position });
        assert_eq!(state.latitude, Some(59.0));
        assert_eq!(state.altitude, Some(20.0));
        assert_eq!(state.speed, Some(4.44)); // 1.234 m/s * 3.6 = 4.4424 km/h
        assert_eq!(state.heading, Some(45.7));
        assert_eq!(state.updated_at, Some(wall));
    }

    #[test]
    fn test_position_updates_only_present_fields() {
        let mut n = normalizer();
        let mut state = SourceState {
            latitude: Some(1.0),
            altitude: Some(99.0),
            ..SourceState::default()
        };
        let report = RawReport::Position(PositionReport {
            lon: Some(2.0),
            ..PositionReport::default()
        });
        n.apply(SourceTag::Top, &report, &mut state, Instant::now(), Utc::now());
        assert_eq!(state.latitude, Some(1.0));
        assert_eq!(state.longitude, Some(2.0));
        assert_eq!(state.altitude, Some(99.0));
    }

    #[test]
    fn test_debounce_window() {
        let mut n = normalizer();
        let mut state = SourceState::default();
        let t0 = Instant::now();

        let first = n.apply(SourceTag::Top, &position(1.0), &mut state, t0, Utc::now());
        assert!(matches!(first, Normalized::Applied { .. }));

        let second = n.apply(
            SourceTag::Top,
            &position(2.0),
            &mut state,
            t0 + Duration::from_millis(300),
            Utc::now(),
        );
        assert_eq!(second, Normalized::Debounced(SourceTag::Top));
        assert_eq!(state.latitude, Some(1.0));

        let third = n.apply(
            SourceTag::Top,
            &position(3.0),
            &mut state,
            t0 + Duration::from_millis(600),
            Utc::now(),
        );
        assert!(matches!(third, Normalized::Applied { .. }));
        assert_eq!(state.latitude, Some(3.0));
    }

    #[test]
    fn test_debounce_is_per_source() {
        let mut n = normalizer();
        let mut top = SourceState::default();
        let mut bottom = SourceState::default();
        let t0 = Instant::now();

        n.apply(SourceTag::Top, &position(1.0), &mut top, t0, Utc::now());
        let out = n.apply(
            SourceTag::Bottom,
            &position(2.0),
            &mut bottom,
            t0 + Duration::from_millis(10),
            Utc::now(),
        );
        assert!(matches!(out, Normalized::Applied { tag: SourceTag::Bottom, .. }));
        assert_eq!(bottom.latitude, Some(2.0));
    }

    #[test]
    fn test_sky_is_never_debounced() {
        let mut n = normalizer();
        let mut state = SourceState::default();
        let t0 = Instant::now();

        n.apply(SourceTag::Top, &sky(&[1, 2], &[]), &mut state, t0, Utc::now());
        let out = n.apply(SourceTag::Top, &sky(&[1, 2, 3], &[9]), &mut state, t0, Utc::now());
        assert!(matches!(out, Normalized::Applied { class: ReportClass::Sky, .. }));
        assert_eq!(state.satellites, Some(3));
        assert_eq!(state.satellite_prns, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_zero_used_satellites_is_unknown() {
        let mut n = normalizer();
        let mut state = SourceState {
            satellites: Some(6),
            ..SourceState::default()
        };
        n.apply(SourceTag::Top, &sky(&[], &[4, 5]), &mut state, Instant::now(), Utc::now());
        assert_eq!(state.satellites, None);
        assert!(state.satellite_prns.is_empty());
    }

    #[test]
    fn test_sky_without_satellite_list_keeps_count() {
        let mut n = normalizer();
        let mut state = SourceState::default();
        let t0 = Instant::now();
        n.apply(SourceTag::Top, &sky(&[3, 8], &[]), &mut state, t0, Utc::now());

        let later = t0 + Duration::from_secs(1);
        let dop_only = RawReport::Sky(SkyReport { device: Some("/dev/ttyACM0".into()), satellites: None });
        n.apply(SourceTag::Top, &dop_only, &mut state, later, Utc::now());
        assert_eq!(state.satellites, Some(2));
        assert_eq!(state.satellite_prns, vec!["3", "8"]);
        assert_eq!(state.last_seen, Some(later));
    }

    #[test]
    fn test_other_class_ignored() {
        let mut n = normalizer();
        let mut state = SourceState::default();
        let out = n.apply(SourceTag::Top, &RawReport::Other, &mut state, Instant::now(), Utc::now());
        assert_eq!(out, Normalized::Ignored);
        assert_eq!(state, SourceState::default());
    }
}
