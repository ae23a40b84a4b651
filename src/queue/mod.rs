pub mod offline;

pub use offline::{CleanReport, OfflineQueue, DEFAULT_REPLAY_DELAY};
