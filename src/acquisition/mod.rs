//! # Acquisition Module
//!
//! The blocking half of the relay: reads gpsd reports on its own thread,
//! normalizes them and pushes emitted fixes onto the async work queue.
//!
//! ## Key Types
//!
//! - [`ReportSource`] - blocking report stream, implemented by [`GpsdSource`]
//! - [`AcquisitionLoop`] - connect/read/reconnect loop around a [`Pipeline`](crate::pipeline::Pipeline)

pub mod source;
pub mod worker;

pub use source::{GpsdSource, ReportSource, WATCH_COMMAND};
pub use worker::AcquisitionLoop;
