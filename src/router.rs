//! Decides where each emitted fix goes: local subscribers always, then the
//! upstream relay when it is connected, otherwise the offline queue when
//! nobody local is listening either.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::broadcast::LocalBroadcastServer;
use crate::model::Fix;
use crate::queue::OfflineQueue;
use crate::relay::RelayHandle;

/// Where a routed fix ended up besides the local broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the upstream relay.
    Relayed,
    /// Written to the offline queue.
    Persisted,
    /// Local subscribers only: the fix was partial, or the relay is down
    /// while someone is listening locally.
    LocalOnly,
    /// Could not be persisted.
    Lost,
}

pub struct DistributionRouter {
    broadcast: Arc<LocalBroadcastServer>,
    relay: Option<RelayHandle>,
    queue: Arc<OfflineQueue>,
}

impl DistributionRouter {
    pub fn new(broadcast: Arc<LocalBroadcastServer>, relay: Option<RelayHandle>, queue: Arc<OfflineQueue>) -> Self {
        DistributionRouter { broadcast, relay, queue }
    }

    pub async fn route(&self, fix: Fix) -> RouteOutcome {
        self.broadcast.publish(&fix);
        if !fix.is_complete() {
            return RouteOutcome::LocalOnly;
        }

        let fix = match &self.relay {
            Some(relay) => match relay.forward(fix) {
                Ok(()) => return RouteOutcome::Relayed,
                Err(fix) => fix,
            },
            None => fix,
        };

        if self.broadcast.subscriber_count() > 0 {
            debug!(target: "router", "Relay offline, fix {} delivered locally only", fix.timestamp);
            return RouteOutcome::LocalOnly;
        }
        match self.queue.append(&fix).await {
            Ok(_) => {
                info!(target: "router", "No receivers, saved fix {} offline", fix.timestamp);
                RouteOutcome::Persisted
            }
            Err(e) => {
                error!(target: "router", "Failed to save fix {} offline: {}", fix.timestamp, e);
                RouteOutcome::Lost
            }
        }
    }

    /// Route fixes until the acquisition side hangs up.
    pub async fn run(self, mut fixes: mpsc::UnboundedReceiver<Fix>) {
        while let Some(fix) = fixes.recv().await {
            self.route(fix).await;
        }
        info!(target: "router", "Fix channel closed, router stopping");
    }
}
