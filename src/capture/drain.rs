use chrono::{DateTime, Utc};
use log::trace;
use serde::Serialize;
use std::sync::Arc;

use crate::capture::delivery::RecordConsumer;
use crate::capture::queue::IngestQueue;
use crate::models::record::PacketRecord;
use crate::utils::clock::Clock;

/// Outcome of one drain tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub delivered: usize,
    /// Records still queued after this tick
    pub backlog: usize,
}

/// Moves at most `cap` records per tick from the ingestion queue to a consumer.
///
/// The host decides when to tick; the scheduler only rate-limits and never drops.
pub struct DrainScheduler {
    queue: Arc<IngestQueue<Arc<PacketRecord>>>,
    cap: usize,
    clock: Arc<dyn Clock>,
    last_tick: Option<DateTime<Utc>>,
    total_delivered: u64,
}

impl DrainScheduler {
    pub fn new(queue: Arc<IngestQueue<Arc<PacketRecord>>>, cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            cap: cap.max(1),
            clock,
            last_tick: None,
            total_delivered: 0,
        }
    }

    pub fn tick(&mut self, consumer: &mut dyn RecordConsumer) -> TickReport {
        let at = self.clock.now();
        let batch = self.queue.pop_batch(self.cap);
        if !batch.is_empty() {
            consumer.deliver(&batch);
        }

        self.last_tick = Some(at);
        self.total_delivered += batch.len() as u64;

        let report = TickReport {
            at,
            delivered: batch.len(),
            backlog: self.queue.len(),
        };
        if report.delivered > 0 {
            trace!("Drain tick delivered {} records, {} queued", report.delivered, report.backlog);
        }
        report
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }

    pub fn total_delivered(&self) -> u64 {
        self.total_delivered
    }
}
