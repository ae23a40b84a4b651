use std::future::Future;
use std::io::Result;

/// One peer that accepts encoded fix frames.
/// Implemented by the WebSocket transport and by in-memory sinks in tests.
pub trait FrameSink: Send {
    /// Write one complete frame. An error means the peer is gone.
    fn send_frame(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the peer has closed its side. Sinks that cannot
    /// observe this never resolve.
    fn closed(&mut self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }

    /// Say goodbye to the peer, if the transport has a way to.
    fn close(&mut self) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }
}

/// Opens sessions to one fixed upstream endpoint.
pub trait Connector: Send + Sync {
    type Stream: FrameSink;

    /// Printable endpoint, for logs.
    fn endpoint(&self) -> String;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}
