//! # Fix Codec Module
//!
//! Wire and text encodings of a [`Fix`](crate::model::Fix).
//!
//! ## Key Items
//!
//! - [`WireEncode`] / [`WireDecode`] - newline-delimited JSON frames, used on
//!   every network transport and as the line format of the offline queue
//! - [`render_fix`] / [`parse_fix_text`] - audit-trail text blocks
//!
//! ## Example
//!
//! ```ignore
//! use gps_relay::codec::{WireEncode, WireDecode};
//!
//! let frame = fix.encode_frame()?;
//! let back = Fix::decode_frame(&frame)?;
//! ```

pub mod frame;
pub mod text;
pub mod traits;

pub use frame::{encode_line, FRAME_DELIMITER};
pub use text::{parse_fix_text, render_fix, UNKNOWN};
pub use traits::{WireDecode, WireEncode};
