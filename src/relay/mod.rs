//! # Upstream Relay Module
//!
//! Streams complete fixes to the upstream collector over one long-lived
//! WebSocket session, replaying the offline backlog at the start of each
//! session.
//!
//! ## Key Types
//!
//! - [`UpstreamRelayClient`]: the reconnecting session loop.
//! - [`RelayHandle`]: connection status and live hand-off for the router.
//! - [`ReconnectPolicy`]: delay schedule between attempts.
//!
//! ## Example
//!
//! ```ignore
//! let connector = WsConnector::new("ws://192.168.26.133:4002");
//! let (client, handle) = relay::channel(connector, queue, ReconnectPolicy::default(), DEFAULT_REPLAY_DELAY);
//! tokio::spawn(client.run());
//! if let Err(fix) = handle.forward(fix) {
//!     queue.append(&fix).await?;
//! }
//! ```

pub mod backoff;
pub mod client;

pub use backoff::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use client::{channel, RelayHandle, RelayPhase, UpstreamRelayClient};
