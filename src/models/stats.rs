use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the capture thread
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    bytes: AtomicU64,
    suspicious: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    protocols: DashMap<String, u64>,
    start_time: RwLock<Option<DateTime<Utc>>>,
    end_time: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Frames handed to the pipeline
    pub total_packets: u64,

    /// Sum of frame lengths
    pub total_bytes: u64,

    /// Records forwarded to the anomaly sink
    pub suspicious_packets: u64,

    /// Capture errors and frames that failed processing
    pub errors: u64,

    /// Receive timeouts without a frame
    pub timeouts: u64,

    /// Frames per protocol label
    pub protocols: BTreeMap<String, u64>,

    /// Capture start time
    pub start_time: Option<DateTime<Utc>>,

    /// Capture end time (if stopped)
    pub end_time: Option<DateTime<Utc>>,

    /// Packet rate (packets per second)
    pub packet_rate: f64,

    /// Data rate (bytes per second)
    pub data_rate: f64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear counters for a new session
    pub fn reset(&self, now: DateTime<Utc>) {
        self.frames.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.suspicious.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.protocols.clear();
        *self.start_time.write() = Some(now);
        *self.end_time.write() = None;
    }

    pub fn mark_stopped(&self, now: DateTime<Utc>) {
        *self.end_time.write() = Some(now);
    }

    pub fn record_frame(&self, protocol: &str, length: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(length as u64, Ordering::Relaxed);
        *self.protocols.entry(protocol.to_string()).or_insert(0) += 1;
    }

    pub fn record_suspicious(&self) {
        self.suspicious.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let total_packets = self.frames.load(Ordering::Relaxed);
        let total_bytes = self.bytes.load(Ordering::Relaxed);
        let start_time = *self.start_time.read();
        let end_time = *self.end_time.read();

        let mut snapshot = StatsSnapshot {
            total_packets,
            total_bytes,
            suspicious_packets: self.suspicious.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            protocols: self
                .protocols
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            start_time,
            end_time,
            packet_rate: 0.0,
            data_rate: 0.0,
        };

        // Calculate rates over the session so far
        if let Some(start) = start_time {
            let until = end_time.unwrap_or(now);
            let elapsed_secs = until.signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
            if elapsed_secs > 0.0 {
                snapshot.packet_rate = total_packets as f64 / elapsed_secs;
                snapshot.data_rate = total_bytes as f64 / elapsed_secs;
            }
        }

        snapshot
    }
}
