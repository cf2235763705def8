use log::{debug, info};
use std::sync::Arc;

use crate::capture::classifier::classify;
use crate::capture::inspector::inspect;
use crate::capture::local::LocalAddresses;
use crate::capture::parser::decode;
use crate::capture::source::Frame;
use crate::models::record::PacketRecord;
use crate::models::stats::CaptureStats;
use crate::storage::sink::PersistenceSink;

/// Per-frame work done on the capture thread.
///
/// Decoding and classification are pure; the only side effect is the
/// post-classification hook that hands suspicious records to the sink.
pub struct FramePipeline {
    local: Arc<LocalAddresses>,
    sink: Arc<dyn PersistenceSink>,
    stats: Arc<CaptureStats>,
}

impl FramePipeline {
    pub fn new(local: Arc<LocalAddresses>, sink: Arc<dyn PersistenceSink>, stats: Arc<CaptureStats>) -> Self {
        Self { local, sink, stats }
    }

    /// Decode and classify without touching the sink
    pub fn build_record(&self, frame: &Frame) -> PacketRecord {
        let decoded = decode(frame);
        let mut record = decoded.record;
        classify(&mut record, decoded.link.as_ref(), &self.local);
        record
    }

    pub fn process(&self, frame: &Frame) -> PacketRecord {
        let record = self.build_record(frame);
        self.stats.record_frame(&record.protocol, record.length);
        self.forward_if_suspicious(&record);
        record
    }

    fn forward_if_suspicious(&self, record: &PacketRecord) {
        if let Some(reason) = inspect(record) {
            info!("Suspicious packet {} ({}): {}", record.summary, record.source, reason);
            self.stats.record_suspicious();
            self.sink.insert(record, &reason);
        } else {
            debug!("Captured packet: {}", record.summary);
        }
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}
