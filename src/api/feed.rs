use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::capture::delivery::{PacketStore, RecordConsumer};
use crate::capture::drain::DrainScheduler;
use crate::models::record::{PacketRecord, TrafficClass};

const BATCH_CHANNEL_CAPACITY: usize = 256;

pub type SharedStore = Arc<RwLock<PacketStore>>;

/// Records handed over by one drain tick
#[derive(Debug, Clone)]
pub struct DeliveredBatch {
    /// Store index of the first record in `records`
    pub first_index: usize,
    pub records: Vec<Arc<PacketRecord>>,
}

impl DeliveredBatch {
    pub fn rows(&self) -> Vec<PacketRow> {
        self.records
            .iter()
            .enumerate()
            .map(|(offset, record)| PacketRow::new(self.first_index + offset, record))
            .collect()
    }
}

/// One line of the packet table
#[derive(Debug, Clone, Serialize)]
pub struct PacketRow {
    pub index: usize,
    pub time: String,
    pub source: String,
    pub destination: String,
    pub protocol: String,
    pub length: usize,
    pub summary: String,
    pub traffic_class: TrafficClass,
}

impl PacketRow {
    pub fn new(index: usize, record: &PacketRecord) -> Self {
        Self {
            index,
            time: record.time_label(),
            source: record.source.clone(),
            destination: record.destination.clone(),
            protocol: record.protocol.clone(),
            length: record.length,
            summary: record.summary.clone(),
            traffic_class: record.traffic_class(),
        }
    }
}

/// Consumer that appends to the shared store and fans batches out to WebSocket clients
pub struct LiveFeed {
    store: SharedStore,
    batches: broadcast::Sender<Arc<DeliveredBatch>>,
}

impl LiveFeed {
    pub fn new(store: SharedStore) -> Self {
        let (batches, _) = broadcast::channel(BATCH_CHANNEL_CAPACITY);
        Self { store, batches }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeliveredBatch>> {
        self.batches.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<Arc<DeliveredBatch>> {
        self.batches.clone()
    }
}

impl RecordConsumer for LiveFeed {
    fn deliver(&mut self, batch: &[Arc<PacketRecord>]) {
        let first_index = {
            let mut store = self.store.write();
            let first_index = store.len();
            store.deliver(batch);
            first_index
        };

        if self.batches.receiver_count() > 0 {
            let _ = self.batches.send(Arc::new(DeliveredBatch {
                first_index,
                records: batch.to_vec(),
            }));
        }
    }
}

/// Tick the scheduler on a fixed period until the task is dropped
pub async fn run_drain(mut scheduler: DrainScheduler, mut feed: LiveFeed, period: Duration) {
    info!("Draining up to {} records every {:?}", scheduler.cap(), period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = scheduler.tick(&mut feed);
        if report.backlog > scheduler.cap() * 10 {
            debug!("Drain backlog at {} records", report.backlog);
        }
    }
}
