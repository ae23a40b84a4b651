pub mod tcp;
pub mod traits;
pub mod ws;

pub use tcp::*;
pub use traits::*;
pub use ws::{Keepalive, WsConnector, WsFrameStream};
