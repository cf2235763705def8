use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use pcap::{Active, Capture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::config::CaptureOptions;
use crate::utils::error::CaptureError;

/// Link layer framing of captured bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Bare IPv4/IPv6 packets
    RawIp,
    /// BSD loopback with a 4 byte address family header
    Loopback,
    /// Linux cooked capture, 16 byte header (`any` device)
    LinuxSll,
    /// Linux cooked capture v2, 20 byte header
    LinuxSll2,
}

impl LinkType {
    /// Map a pcap DLT value; unknown types are treated as Ethernet
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            0 | 108 => LinkType::Loopback,
            12 | 14 | 101 => LinkType::RawIp,
            113 => LinkType::LinuxSll,
            276 => LinkType::LinuxSll2,
            _ => LinkType::Ethernet,
        }
    }
}

/// One captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub link_type: LinkType,
}

/// Shared switch that force-closes a capture handle from another thread.
///
/// A handle checks it around every blocking read, so a close is observed
/// within one read timeout.
#[derive(Debug, Clone, Default)]
pub struct HandleCloser(Arc<AtomicBool>);

impl HandleCloser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An open capture. Dropping it releases the underlying resources.
pub trait CaptureHandle: Send {
    /// Block up to the read timeout for the next frame.
    ///
    /// `Timeout`, `EndOfStream` and `Closed` are reported as errors.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Switch that makes `next_frame` return `Closed`
    fn closer(&self) -> HandleCloser;
}

/// Opens capture handles on named interfaces
pub trait CaptureOpener: Send + Sync {
    fn open(&self, interface: &str, options: &CaptureOptions) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Live capture through libpcap / Npcap
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapOpener;

impl CaptureOpener for PcapOpener {
    fn open(&self, interface: &str, options: &CaptureOptions) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let open_failure = |e: pcap::Error| CaptureError::OpenFailure {
            interface: interface.to_string(),
            reason: e.to_string(),
        };

        info!(
            "Opening {} (snaplen={}, promiscuous={}, timeout={}ms)",
            interface, options.snaplen, options.promiscuous, options.timeout_ms
        );

        let mut capture = Capture::from_device(interface)
            .map_err(open_failure)?
            .promisc(options.promiscuous)
            .snaplen(options.snaplen)
            .timeout(options.timeout_ms)
            .open()
            .map_err(open_failure)?;

        if let Some(filter) = &options.bpf_filter {
            match capture.filter(filter.as_str(), true) {
                Ok(_) => info!("Filter applied successfully: {}", filter),
                Err(e) => warn!("Failed to apply filter {}: {}", filter, e),
            }
        }

        let link_type = LinkType::from_dlt(capture.get_datalink().0);
        info!("Successfully opened {} for live capture ({:?})", interface, link_type);

        Ok(Box::new(PcapHandle {
            capture,
            link_type,
            closer: HandleCloser::new(),
        }))
    }
}

/// Active pcap capture
pub struct PcapHandle {
    capture: Capture<Active>,
    link_type: LinkType,
    closer: HandleCloser,
}

impl CaptureHandle for PcapHandle {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.closer.is_closed() {
            return Err(CaptureError::Closed);
        }

        let packet = self.capture.next_packet()?;
        let ts = packet.header.ts;
        let timestamp = Utc
            .timestamp_opt(ts.tv_sec as i64, (ts.tv_usec as u32).saturating_mul(1_000))
            .single()
            .unwrap_or_else(Utc::now);
        let frame = Frame {
            data: packet.data.to_vec(),
            timestamp,
            link_type: self.link_type,
        };

        // A close that raced the blocking read wins over the frame
        if self.closer.is_closed() {
            return Err(CaptureError::Closed);
        }
        Ok(frame)
    }

    fn closer(&self) -> HandleCloser {
        self.closer.clone()
    }
}
