use socket2::{Domain, Protocol, Socket, Type};
use std::io::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LISTEN_BACKLOG: i32 = 128;

/// Bind a listener with `SO_REUSEADDR`, so a restarted process can take
/// the port back while old connections sit in TIME_WAIT.
///
/// Must be called from inside a tokio runtime.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}
