use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use super::backoff::ReconnectPolicy;
use crate::codec::WireEncode;
use crate::model::Fix;
use crate::queue::OfflineQueue;
use crate::transport::{Connector, FrameSink};

/// Connection state of the upstream relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Disconnected,
    Connecting,
    DrainingOffline,
    Streaming,
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayPhase::Disconnected => "disconnected",
            RelayPhase::Connecting => "connecting",
            RelayPhase::DrainingOffline => "draining offline",
            RelayPhase::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Router-side view of the relay: connection status plus the live queue.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<Fix>,
    phase: watch::Receiver<RelayPhase>,
}

impl RelayHandle {
    pub fn phase(&self) -> RelayPhase {
        *self.phase.borrow()
    }

    /// True once a session is established, including while the offline
    /// backlog is being replayed.
    pub fn is_connected(&self) -> bool {
        matches!(self.phase(), RelayPhase::DrainingOffline | RelayPhase::Streaming)
    }

    pub fn watch_phase(&self) -> watch::Receiver<RelayPhase> {
        self.phase.clone()
    }

    /// Hand a fix to the live session. Gives it back when no session is
    /// up or the relay task has stopped.
    ///
    /// The phase stays borrowed until the fix is queued, so the session
    /// cannot end in between and miss it.
    pub fn forward(&self, fix: Fix) -> Result<(), Fix> {
        let phase = self.phase.borrow();
        if !matches!(*phase, RelayPhase::DrainingOffline | RelayPhase::Streaming) {
            return Err(fix);
        }
        self.tx.send(fix).map_err(|e| e.0)
    }
}

enum SessionEnd {
    Lost { reason: String, unsent: Option<Fix> },
    WorkQueueClosed,
}

/// Keeps one session open to the upstream endpoint: connect, replay the
/// offline backlog, then stream live fixes until the link drops.
///
/// When a session ends, the fix whose send failed and every fix still
/// queued behind it are appended to the offline queue, in order, before
/// anyone else may append. The next session replays them first.
pub struct UpstreamRelayClient<C: Connector> {
    connector: C,
    queue: Arc<OfflineQueue>,
    live_rx: mpsc::UnboundedReceiver<Fix>,
    phase: watch::Sender<RelayPhase>,
    policy: ReconnectPolicy,
    replay_delay: Duration,
}

/// Build a relay client and the handle used to feed it.
pub fn channel<C: Connector>(
    connector: C,
    queue: Arc<OfflineQueue>,
    policy: ReconnectPolicy,
    replay_delay: Duration,
) -> (UpstreamRelayClient<C>, RelayHandle) {
    let (tx, live_rx) = mpsc::unbounded_channel();
    let (phase, phase_rx) = watch::channel(RelayPhase::Disconnected);
    let client = UpstreamRelayClient {
        connector,
        queue,
        live_rx,
        phase,
        policy,
        replay_delay,
    };
    (client, RelayHandle { tx, phase: phase_rx })
}

impl<C: Connector> UpstreamRelayClient<C> {
    fn set_phase(&self, phase: RelayPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(target: "relay", "Relay {} -> {}", previous, phase);
        }
    }

    /// Run until every [`RelayHandle`] is dropped or the reconnect policy
    /// gives up.
    pub async fn run(mut self) {
        let endpoint = self.connector.endpoint();
        loop {
            self.set_phase(RelayPhase::Connecting);
            match self.connector.connect().await {
                Ok(mut stream) => {
                    info!(target: "relay", "Connected to upstream {}", endpoint);
                    self.policy.reset();
                    match self.session(&mut stream).await {
                        SessionEnd::WorkQueueClosed => {
                            self.set_phase(RelayPhase::Disconnected);
                            stream.close().await;
                            info!(target: "relay", "Work queue closed, relay stopping");
                            return;
                        }
                        SessionEnd::Lost { reason, unsent } => {
                            warn!(target: "relay", "Lost connection to {}: {}", endpoint, reason);
                            self.park_unsent(unsent).await;
                        }
                    }
                }
                Err(e) => {
                    self.set_phase(RelayPhase::Disconnected);
                    error!(target: "relay", "Error connecting to upstream {}: {}", endpoint, e);
                }
            }

            let Some(delay) = self.policy.next_delay() else {
                error!(
                    target: "relay",
                    "Giving up on {} after {} attempts",
                    endpoint,
                    self.policy.attempts()
                );
                return;
            };
            info!(target: "relay", "Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn session(&mut self, stream: &mut C::Stream) -> SessionEnd {
        self.set_phase(RelayPhase::DrainingOffline);
        match self.queue.drain_and_clear(stream, self.replay_delay).await {
            Ok(0) => {}
            Ok(sent) => info!(target: "relay", "Sent {} offline entries", sent),
            Err(crate::error::QueueError::ReplayInterrupted { sent, source }) => {
                return SessionEnd::Lost {
                    reason: format!("replay stopped after {} entries: {}", sent, source),
                    unsent: None,
                };
            }
            // Local storage trouble must not hold back live delivery.
            Err(e) => error!(target: "relay", "Error processing offline data: {}", e),
        }

        self.set_phase(RelayPhase::Streaming);
        loop {
            let fix = tokio::select! {
                next = self.live_rx.recv() => match next {
                    Some(fix) => fix,
                    None => return SessionEnd::WorkQueueClosed,
                },
                _ = stream.closed() => {
                    return SessionEnd::Lost { reason: "closed by peer".into(), unsent: None };
                }
            };

            let frame = match fix.encode_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(target: "relay", "Failed to encode fix {}: {}", fix.timestamp, e);
                    continue;
                }
            };
            if let Err(e) = stream.send_frame(&frame).await {
                return SessionEnd::Lost { reason: e.to_string(), unsent: Some(fix) };
            }
            debug!(target: "relay", "Sent fix {} upstream", fix.timestamp);
        }
    }

    /// Go `Disconnected` and move `unsent` plus everything still waiting in
    /// the live queue to the offline queue.
    ///
    /// Both happen under the queue lock. The router appends on its own once
    /// it sees the relay down, so its fixes always land behind these.
    async fn park_unsent(&mut self, unsent: Option<Fix>) {
        let phase = &self.phase;
        let live_rx = &mut self.live_rx;
        let parked = self
            .queue
            .append_batch(|| {
                let previous = phase.send_replace(RelayPhase::Disconnected);
                debug!(target: "relay", "Relay {} -> {}", previous, RelayPhase::Disconnected);
                let mut held: Vec<Fix> = unsent.into_iter().collect();
                while let Ok(fix) = live_rx.try_recv() {
                    held.push(fix);
                }
                held
            })
            .await;
        match parked {
            Ok(0) => {}
            Ok(saved) => info!(target: "relay", "Saved {} unsent fixes offline", saved),
            Err(e) => error!(target: "relay", "Lost unsent fixes: {}", e),
        }
    }
}
