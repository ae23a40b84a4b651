pub mod server;

pub use server::{BroadcastReport, Frame, LocalBroadcastServer, SubscriberId};
