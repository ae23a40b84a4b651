//! # Telemetry Data Model
//!
//! - [`RawReport`] - transient report from the GPS daemon
//! - [`SourceState`] - per-receiver accumulator owned by the completeness gate
//! - [`Fix`] - the canonical record handed to every consumer

pub mod fix;
pub mod report;
pub mod source;

pub use fix::{format_timestamp, Fix, SourceSnapshot, TIMESTAMP_FORMAT};
pub use report::{PositionReport, RawReport, ReportClass, Satellite, SkyReport};
pub use source::{SourceState, SourceTag};
