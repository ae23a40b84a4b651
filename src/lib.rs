pub mod acquisition;
pub mod broadcast;
pub mod codec;
pub mod error;
pub mod http;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod relay;
pub mod router;
pub mod runtime;
pub mod transport;

pub use broadcast::LocalBroadcastServer;
pub use codec::{WireDecode, WireEncode};
pub use error::{CodecError, ConfigError, QueueError, RuntimeError, SourceError};
pub use model::{Fix, RawReport, SourceSnapshot, SourceTag};
pub use pipeline::{CompletenessGate, EmissionMode, Pipeline, ReportNormalizer};
pub use queue::OfflineQueue;
pub use relay::{ReconnectPolicy, RelayHandle, UpstreamRelayClient};
pub use router::{DistributionRouter, RouteOutcome};
pub use runtime::RelayRuntime;
