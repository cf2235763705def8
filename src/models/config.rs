use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum bytes captured per frame
pub const DEFAULT_SNAPLEN: i32 = 65_536;

/// Per-receive timeout of the capture handle
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 1_000;

/// Records moved from the ingestion queue per drain tick
pub const DEFAULT_DRAIN_CAP: usize = 500;

/// Drain tick period, roughly one display refresh
pub const DEFAULT_TICK_MS: u64 = 16;

/// Ingestion queue bound before the oldest record is discarded
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Options used when opening a capture handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub snaplen: i32,
    pub promiscuous: bool,
    pub timeout_ms: i32,
    /// BPF filter expression applied after open
    pub bpf_filter: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            bpf_filter: None,
        }
    }
}

/// What the ingestion queue does when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "capacity")]
pub enum QueuePolicy {
    /// Never drops; grows with consumer lag
    Unbounded,

    /// Discards the oldest queued record to admit a new one
    DropOldest(usize),
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::DropOldest(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network interface to capture from
    pub interface: Option<String>,

    /// Port for the REST API server
    pub port: u16,

    /// Capture handle options
    pub capture: CaptureOptions,

    /// Records delivered per drain tick
    pub drain_cap: usize,

    /// Drain tick period in milliseconds
    pub tick_ms: u64,

    /// Ingestion queue bound
    pub queue_policy: QueuePolicy,

    /// JSON lines file receiving suspicious records
    pub anomaly_log: Option<PathBuf>,

    /// Delivered records kept by the host, `None` keeps everything
    pub retain: Option<usize>,
}

impl AppConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: None,
            port: 3000,
            capture: CaptureOptions::default(),
            drain_cap: DEFAULT_DRAIN_CAP,
            tick_ms: DEFAULT_TICK_MS,
            queue_policy: QueuePolicy::default(),
            anomaly_log: None,
            retain: None,
        }
    }
}
