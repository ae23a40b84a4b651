use super::tcp::DEFAULT_CONNECT_TIMEOUT;
use super::traits::{Connector, FrameSink};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Ping and close timing of one WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Pause between our pings
    pub ping_interval: Duration,
    /// Longest wait for a pong before the peer counts as gone
    pub ping_timeout: Duration,
    /// Longest wait for the peer to answer our close frame
    pub close_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

fn into_io(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            Error::new(ErrorKind::BrokenPipe, "websocket closed")
        }
        other => Error::other(other),
    }
}

/// WebSocket session carrying one text message per frame.
pub struct WsFrameStream<S> {
    ws: WebSocketStream<S>,
    peer: SocketAddr,
    keepalive: Keepalive,
    next_ping: Instant,
    pong_due: Option<Instant>,
}

impl<S> WsFrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ws: WebSocketStream<S>, peer: SocketAddr, keepalive: Keepalive) -> Self {
        WsFrameStream {
            ws,
            peer,
            keepalive,
            next_ping: Instant::now() + keepalive.ping_interval,
            pong_due: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn ping(&mut self) -> Result<()> {
        let now = Instant::now();
        self.ws.send(Message::Ping(Vec::new())).await.map_err(into_io)?;
        self.next_ping = now + self.keepalive.ping_interval;
        if self.pong_due.is_none() {
            self.pong_due = Some(now + self.keepalive.ping_timeout);
        }
        Ok(())
    }
}

impl<S> FrameSink for WsFrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // The line delimiter is dropped; the message boundary replaces it.
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(frame.trim_ascii_end()).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        self.ws.send(Message::Text(text.to_owned())).await.map_err(into_io)
    }

    // Reading is what answers the peer's pings, so this also keeps the
    // session alive while it waits.
    async fn closed(&mut self) {
        loop {
            let deadline = self.pong_due.map_or(self.next_ping, |due| due.min(self.next_ping));
            tokio::select! {
                msg = self.ws.next() => match msg {
                    Some(Ok(Message::Pong(_))) => self.pong_due = None,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(target: "transport", "Peer {} closed the session", self.peer);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(target: "transport", "Session with {} failed: {}", self.peer, e);
                        return;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    if self.pong_due.is_some_and(|due| Instant::now() >= due) {
                        warn!(
                            target: "transport",
                            "No pong from {} within {:?}",
                            self.peer,
                            self.keepalive.ping_timeout
                        );
                        return;
                    }
                    if Instant::now() >= self.next_ping && self.ping().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let ws = &mut self.ws;
        let closing = async {
            ws.close(None).await?;
            while let Some(msg) = ws.next().await {
                msg?;
            }
            Ok::<(), tungstenite::Error>(())
        };
        match tokio::time::timeout(self.keepalive.close_timeout, closing).await {
            Ok(Ok(())) | Ok(Err(tungstenite::Error::ConnectionClosed)) => {}
            Ok(Err(e)) => debug!(target: "transport", "Close with {} failed: {}", self.peer, e),
            Err(_) => debug!(target: "transport", "Close with {} timed out", self.peer),
        }
    }
}

/// Run the server side of the handshake on an accepted connection.
pub async fn accept(stream: TcpStream, keepalive: Keepalive) -> Result<WsFrameStream<TcpStream>> {
    let peer = stream.peer_addr()?;
    let _ = stream.set_nodelay(true);
    let ws = tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, tokio_tungstenite::accept_async(stream))
        .await
        .map_err(|_| Error::new(ErrorKind::TimedOut, "websocket handshake timed out"))?
        .map_err(into_io)?;
    Ok(WsFrameStream::new(ws, peer, keepalive))
}

/// Client-side connector for a `ws://host:port/path` upstream endpoint.
pub struct WsConnector {
    url: String,
    timeout: Duration,
    keepalive: Keepalive,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector {
            url: url.into(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: Keepalive::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    fn authority(&self) -> Result<(String, u16)> {
        parse_ws_url(&self.url)
    }
}

/// Host and port of a plain `ws://` URL. Port 80 when none is given.
pub fn parse_ws_url(url: &str) -> Result<(String, u16)> {
    let uri: Uri = url.parse().map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
    if uri.scheme_str() != Some("ws") {
        return Err(Error::new(ErrorKind::InvalidInput, format!("not a ws:// url: {}", url)));
    }
    let host = uri
        .host()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, format!("no host in {}", url)))?;
    Ok((host.to_string(), uri.port_u16().unwrap_or(80)))
}

impl Connector for WsConnector {
    type Stream = WsFrameStream<TcpStream>;

    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<WsFrameStream<TcpStream>> {
        let (host, port) = self.authority()?;
        let handshake = async {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            let peer = stream.peer_addr()?;
            let _ = stream.set_nodelay(true);
            let (ws, _) = tokio_tungstenite::client_async(self.url.as_str(), stream)
                .await
                .map_err(into_io)?;
            Ok::<_, Error>((ws, peer))
        };
        let (ws, peer) = tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| Error::new(ErrorKind::TimedOut, "connect timed out"))??;
        Ok(WsFrameStream::new(ws, peer, self.keepalive))
    }
}
