use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::SourceTag;
use crate::pipeline::{EmissionMode, DEFAULT_DATA_TIMEOUT, DEFAULT_DEBOUNCE};
use crate::queue::DEFAULT_REPLAY_DELAY;
use crate::relay::ReconnectPolicy;
use crate::transport::{ws, Keepalive};

pub const UNKNOWN_DEVICE_ID: &str = "unknown_device_id";
const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Binds a gpsd device path to one of the two receivers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceBinding {
    pub device: String,
    pub tag: SourceTag,
}

/// gpsd connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct GpsdConfig {
    #[serde(default = "default_gpsd_host")]
    pub host: String,
    #[serde(default = "default_gpsd_port")]
    pub port: u16,
    /// Delay between reconnect attempts (ms, default: 2000)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Give up if the first connection fails this many times (default: retry forever)
    #[serde(default)]
    pub startup_attempts: Option<u32>,
}

impl Default for GpsdConfig {
    fn default() -> Self {
        GpsdConfig {
            host: default_gpsd_host(),
            port: default_gpsd_port(),
            reconnect_delay_ms: default_reconnect_delay(),
            startup_attempts: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    /// Minimum spacing of accepted position reports per source (ms, default: 500)
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        NormalizerConfig { debounce_ms: default_debounce() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub emission: EmissionMode,
    /// Send incomplete snapshots to local subscribers
    #[serde(default)]
    pub broadcast_partial: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    /// Seconds without a report before a source counts as stale (default: 30)
    #[serde(default = "default_data_timeout")]
    pub data_timeout_secs: u64,
    /// Clear a stale source's readings instead of only warning
    #[serde(default)]
    pub invalidate_stale: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            data_timeout_secs: default_data_timeout(),
            invalidate_stale: false,
            check_interval_ms: default_check_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "default_broadcast_bind")]
    pub bind: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig { bind: default_broadcast_bind() }
    }
}

/// Keepalive timing shared by subscriber sessions and the upstream session
#[derive(Debug, Deserialize, Clone)]
pub struct WebSocketConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Seconds to wait for a pong before dropping the peer (default: 30)
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

impl WebSocketConfig {
    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { bind: default_http_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub max_delay_ms: u64,
    /// Growth factor between attempts; 1.0 keeps the delay fixed
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay_ms: default_reconnect_delay(),
            max_delay_ms: default_reconnect_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::exponential(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Collector endpoint, a `ws://host:port` URL
    #[serde(default = "default_upstream_address")]
    pub address: String,
    /// Pause between replayed offline entries (ms, default: 100)
    #[serde(default = "default_drain_send_delay")]
    pub drain_send_delay_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            address: default_upstream_address(),
            drain_send_delay_ms: default_drain_send_delay(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Offline queue file, relative to the working directory unless absolute
    #[serde(default = "default_offline_file")]
    pub offline_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: default_data_dir(),
            offline_file: default_offline_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Complete relay configuration. Every field has a default, so `{}` is a
/// valid document.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_ship_id")]
    pub ship_id: String,
    /// Defaults to the board serial number
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceBinding>,
    #[serde(default)]
    pub gpsd: GpsdConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// `null` disables the point-query endpoint
    #[serde(default = "default_http")]
    pub http: Option<HttpConfig>,
    /// `null` disables the upstream relay
    #[serde(default = "default_upstream")]
    pub upstream: Option<UpstreamConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            ship_id: default_ship_id(),
            device_id: None,
            sources: default_sources(),
            gpsd: GpsdConfig::default(),
            normalizer: NormalizerConfig::default(),
            gate: GateConfig::default(),
            watchdog: WatchdogConfig::default(),
            broadcast: BroadcastConfig::default(),
            websocket: WebSocketConfig::default(),
            http: default_http(),
            upstream: default_upstream(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_ship_id() -> String { "SHIP456".into() }
fn default_sources() -> Vec<SourceBinding> {
    vec![
        SourceBinding { device: "/dev/ttyACM0".into(), tag: SourceTag::Top },
        SourceBinding { device: "/dev/ttyACM1".into(), tag: SourceTag::Bottom },
    ]
}
fn default_gpsd_host() -> String { "127.0.0.1".into() }
fn default_gpsd_port() -> u16 { 2947 }
fn default_reconnect_delay() -> u64 { 2000 }
fn default_debounce() -> u64 { DEFAULT_DEBOUNCE.as_millis() as u64 }
fn default_data_timeout() -> u64 { DEFAULT_DATA_TIMEOUT.as_secs() }
fn default_check_interval() -> u64 { 1000 }
fn default_broadcast_bind() -> String { "0.0.0.0:8766".into() }
fn default_http_bind() -> String { "0.0.0.0:8080".into() }
fn default_http() -> Option<HttpConfig> { Some(HttpConfig::default()) }
fn default_upstream_address() -> String { "ws://192.168.26.133:4002".into() }
fn default_drain_send_delay() -> u64 { DEFAULT_REPLAY_DELAY.as_millis() as u64 }
fn default_ping_interval() -> u64 { ws::DEFAULT_PING_INTERVAL.as_secs() }
fn default_ping_timeout() -> u64 { ws::DEFAULT_PING_TIMEOUT.as_secs() }
fn default_close_timeout() -> u64 { ws::DEFAULT_CLOSE_TIMEOUT.as_secs() }
fn default_multiplier() -> f64 { 1.0 }
fn default_upstream() -> Option<UpstreamConfig> { Some(UpstreamConfig::default()) }
fn default_data_dir() -> PathBuf { PathBuf::from("gps_data") }
fn default_offline_file() -> PathBuf { PathBuf::from("offline_gps_data.json") }
fn default_log_level() -> String { "info".into() }

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for tag in SourceTag::ALL {
            let bound = self.sources.iter().filter(|b| b.tag == tag).count();
            if bound != 1 {
                return Err(ConfigError::Invalid(format!(
                    "expected exactly one source bound to {}, found {}",
                    tag, bound
                )));
            }
        }
        if self.sources[0].device == self.sources[1].device {
            return Err(ConfigError::Invalid(format!(
                "device {} bound to both sources",
                self.sources[0].device
            )));
        }
        if self.normalizer.debounce_ms == 0 {
            return Err(ConfigError::Invalid("normalizer.debounce_ms must be positive".into()));
        }
        Self::parse_addr("broadcast.bind", &self.broadcast.bind)?;
        if let Some(http) = &self.http {
            Self::parse_addr("http.bind", &http.bind)?;
        }
        if let Some(upstream) = &self.upstream {
            ws::parse_ws_url(&upstream.address)
                .map_err(|e| ConfigError::Invalid(format!("upstream.address: {}", e)))?;
        }
        if self.websocket.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("websocket.ping_interval_secs must be positive".into()));
        }
        Ok(())
    }

    fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
        value
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", field, value, e)))
    }

    pub fn broadcast_addr(&self) -> Result<SocketAddr, ConfigError> {
        Self::parse_addr("broadcast.bind", &self.broadcast.bind)
    }

    pub fn http_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.http
            .as_ref()
            .map(|http| Self::parse_addr("http.bind", &http.bind))
            .transpose()
    }

    /// Device bindings in the shape the normalizer takes.
    pub fn bindings(&self) -> impl Iterator<Item = (String, SourceTag)> + '_ {
        self.sources.iter().map(|b| (b.device.clone(), b.tag))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.normalizer.debounce_ms)
    }

    /// Configured device id, else the board serial, else a fixed placeholder.
    pub fn resolve_device_id(&self) -> String {
        if let Some(id) = &self.device_id {
            return id.clone();
        }
        fs::read_to_string(CPUINFO_PATH)
            .ok()
            .and_then(|text| parse_cpu_serial(&text))
            .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string())
    }
}

/// Extract the `Serial` line value from `/proc/cpuinfo` text.
pub fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("Serial"))
        .find_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|serial| !serial.is_empty())
}
