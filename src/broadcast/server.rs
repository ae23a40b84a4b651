use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::codec::WireEncode;
use crate::model::Fix;
use crate::transport::{ws, FrameSink, Keepalive};

/// Encoded fix shared by every subscriber queue.
pub type Frame = Arc<[u8]>;
pub type SubscriberId = u64;

struct Subscriber {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct Shared {
    subscribers: HashMap<SubscriberId, Subscriber>,
    latest: Option<Fix>,
    latest_complete: Option<Fix>,
}

/// Outcome of one broadcast round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Tracks connected subscribers and pushes every fix to all of them.
///
/// Subscribers connect over WebSocket and receive one text message per
/// fix. Each is fed through its own unbounded queue drained by a writer
/// task, so one slow or dead peer never holds up the others. There is no
/// backpressure: a subscriber that stops reading lets its queue grow.
#[derive(Default)]
pub struct LocalBroadcastServer {
    shared: Mutex<Shared>,
    next_id: AtomicU64,
    keepalive: Keepalive,
}

impl LocalBroadcastServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panic while holding the lock leaves the maps consistent.
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn subscribers(&self) -> Vec<SocketAddr> {
        self.lock().subscribers.values().map(|s| s.peer).collect()
    }

    /// Most recently published fix, complete or not.
    pub fn latest(&self) -> Option<Fix> {
        self.lock().latest.clone()
    }

    /// Most recently published complete fix, for point queries.
    pub fn latest_complete(&self) -> Option<Fix> {
        self.lock().latest_complete.clone()
    }

    /// Add a subscriber. The returned queue already holds the latest fix,
    /// if there is one.
    pub fn register(&self, peer: SocketAddr) -> (SubscriberId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut shared = self.lock();
        if let Some(latest) = &shared.latest {
            match latest.encode_frame() {
                Ok(frame) => {
                    let _ = tx.send(Frame::from(frame));
                }
                Err(e) => error!(target: "broadcast", "Failed to encode catch-up fix: {}", e),
            }
        }
        shared.subscribers.insert(id, Subscriber { peer, tx });
        info!(
            target: "broadcast",
            "Subscriber {} connected from {} ({} total)",
            id,
            peer,
            shared.subscribers.len()
        );
        (id, rx)
    }

    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut shared = self.lock();
        match shared.subscribers.remove(&id) {
            Some(sub) => {
                info!(target: "broadcast", "Subscriber {} ({}) disconnected", id, sub.peer);
                true
            }
            None => false,
        }
    }

    /// Record `fix` as the latest and queue it for every subscriber.
    /// Subscribers whose queue is gone are pruned.
    pub fn publish(&self, fix: &Fix) -> BroadcastReport {
        let frame = match fix.encode_frame() {
            Ok(frame) => Frame::from(frame),
            Err(e) => {
                error!(target: "broadcast", "Failed to encode fix {}: {}", fix.timestamp, e);
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut shared = self.lock();
        shared.latest = Some(fix.clone());
        if fix.is_complete() {
            shared.latest_complete = Some(fix.clone());
        }
        shared.subscribers.retain(|id, sub| match sub.tx.send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(_) => {
                info!(target: "broadcast", "Pruning subscriber {} ({})", id, sub.peer);
                report.pruned += 1;
                false
            }
        });
        if report.delivered > 0 {
            debug!(target: "broadcast", "Broadcasted fix {} to {} subscribers", fix.timestamp, report.delivered);
        }
        report
    }

    /// Accept subscribers until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(target: "broadcast", "Subscriber server listening on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(Arc::clone(&self).handle_connection(stream, peer));
                }
                Err(e) => {
                    warn!(target: "broadcast", "Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut conn = match ws::accept(stream, self.keepalive).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target: "broadcast", "WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        };
        let (id, mut rx) = self.register(peer);
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = conn.send_frame(&frame).await {
                            debug!(target: "broadcast", "Send to subscriber {} failed: {}", id, e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = conn.closed() => break,
            }
        }
        self.unregister(id);
        conn.close().await;
    }
}
