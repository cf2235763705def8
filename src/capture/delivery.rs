use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::record::PacketRecord;

/// Receives drained records in arrival order
pub trait RecordConsumer {
    fn deliver(&mut self, batch: &[Arc<PacketRecord>]);
}

/// Case-insensitive substring match over the displayed columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFilter {
    needle: String,
}

impl LiveFilter {
    /// `None` for blank input, which means "show everything"
    pub fn parse(query: &str) -> Option<Self> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            None
        } else {
            Some(Self { needle })
        }
    }

    pub fn query(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, record: &PacketRecord) -> bool {
        let needle = self.needle.as_str();
        record.source.to_lowercase().contains(needle)
            || record.destination.to_lowercase().contains(needle)
            || record.protocol.to_lowercase().contains(needle)
            || record.summary.to_lowercase().contains(needle)
            || record.length.to_string().contains(needle)
            || record.time_label().contains(needle)
    }
}

/// Every record delivered to the host, plus a filtered view over them.
///
/// Filtering never removes records; changing the filter re-evaluates it over
/// the whole delivered sequence. With a retention limit the oldest records are
/// dropped once it is exceeded, and indices shift down accordingly.
#[derive(Debug, Default)]
pub struct PacketStore {
    records: Vec<Arc<PacketRecord>>,
    filter: Option<LiveFilter>,
    visible: Vec<usize>,
    retention: Option<usize>,
}

impl PacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that keeps at most `limit` records (at least one)
    pub fn with_retention(limit: usize) -> Self {
        Self {
            retention: Some(limit.max(1)),
            ..Self::default()
        }
    }

    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    fn enforce_retention(&mut self) {
        let limit = match self.retention {
            Some(limit) if self.records.len() > limit => limit,
            _ => return,
        };

        let excess = self.records.len() - limit;
        self.records.drain(..excess);
        self.visible.retain(|&i| i >= excess);
        for index in &mut self.visible {
            *index -= excess;
        }
        debug!("Retention limit {} reached, dropped {} oldest records", limit, excess);
    }

    /// Apply a filter; blank text clears it
    pub fn set_filter(&mut self, query: &str) {
        self.filter = LiveFilter::parse(query);
        self.refilter();
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.refilter();
    }

    pub fn filter(&self) -> Option<&LiveFilter> {
        self.filter.as_ref()
    }

    fn refilter(&mut self) {
        self.visible = match &self.filter {
            None => (0..self.records.len()).collect(),
            Some(filter) => self
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| filter.matches(r))
                .map(|(i, _)| i)
                .collect(),
        };
    }

    /// Drop everything delivered so far
    pub fn clear(&mut self) {
        self.records.clear();
        self.visible.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    /// Record by its position in the delivered sequence
    pub fn get(&self, index: usize) -> Option<&Arc<PacketRecord>> {
        self.records.get(index)
    }

    pub fn all(&self) -> &[Arc<PacketRecord>] {
        &self.records
    }

    /// Page of the filtered view as (delivered index, record)
    pub fn visible_page(&self, offset: usize, limit: usize) -> Vec<(usize, Arc<PacketRecord>)> {
        self.visible
            .iter()
            .skip(offset)
            .take(limit)
            .map(|&i| (i, self.records[i].clone()))
            .collect()
    }

    /// Records per protocol over everything delivered
    pub fn protocol_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.protocol.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl RecordConsumer for PacketStore {
    fn deliver(&mut self, batch: &[Arc<PacketRecord>]) {
        for record in batch {
            let index = self.records.len();
            if self.filter.as_ref().map_or(true, |f| f.matches(record)) {
                self.visible.push(index);
            }
            self.records.push(record.clone());
        }
        self.enforce_retention();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(source: &str, protocol: &str, summary: &str) -> Arc<PacketRecord> {
        Arc::new(PacketRecord {
            timestamp: Utc::now(),
            source: source.to_string(),
            destination: "10.0.0.254".to_string(),
            protocol: protocol.to_string(),
            length: 74,
            summary: summary.to_string(),
            dump: String::new(),
            is_self_originated: false,
            is_broadcast_or_multicast: false,
            details: None,
        })
    }

    fn sample() -> Vec<Arc<PacketRecord>> {
        vec![
            record("10.0.0.1", "TCP", "TCP 5000 → 443"),
            record("10.0.0.2", "UDP", "UDP 4000 → 53"),
            record("fe80::1", "ICMPV6", "ICMPV6 packet"),
            record("10.0.0.3", "TCP", "TCP 6000 → 80"),
        ]
    }

    #[test]
    fn test_deliver_appends_in_order() {
        let mut store = PacketStore::new();
        let batch = sample();
        store.deliver(&batch[..2]);
        store.deliver(&batch[2..]);
        assert_eq!(store.len(), 4);
        assert!(Arc::ptr_eq(store.get(0).unwrap(), &batch[0]));
        assert!(Arc::ptr_eq(store.get(3).unwrap(), &batch[3]));
    }

    #[test]
    fn test_filter_is_case_insensitive_and_non_destructive() {
        let mut store = PacketStore::new();
        store.deliver(&sample());

        store.set_filter("tcp");
        assert_eq!(store.visible_len(), 2);
        assert_eq!(store.len(), 4);
        let indices: Vec<usize> = store.visible_page(0, 10).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 3]);

        store.set_filter("FE80");
        assert_eq!(store.visible_len(), 1);

        store.clear_filter();
        assert_eq!(store.visible_len(), 4);
    }

    #[test]
    fn test_blank_filter_shows_everything() {
        let mut store = PacketStore::new();
        store.deliver(&sample());
        store.set_filter("   ");
        assert!(store.filter().is_none());
        assert_eq!(store.visible_len(), 4);
    }

    #[test]
    fn test_filter_applies_to_later_deliveries() {
        let mut store = PacketStore::new();
        store.set_filter("udp");
        store.deliver(&sample());
        store.deliver(&[record("10.0.0.9", "UDP", "UDP 1 → 2")]);
        assert_eq!(store.visible_len(), 2);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_filter_matches_summary_and_length() {
        let mut store = PacketStore::new();
        store.deliver(&sample());
        store.set_filter("→ 443");
        assert_eq!(store.visible_len(), 1);
        store.set_filter("74");
        assert_eq!(store.visible_len(), 4);
    }

    #[test]
    fn test_clear_and_protocol_counts() {
        let mut store = PacketStore::new();
        store.deliver(&sample());
        let counts = store.protocol_counts();
        assert_eq!(counts.get("TCP"), Some(&2));
        assert_eq!(counts.get("UDP"), Some(&1));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.visible_len(), 0);
        assert!(store.protocol_counts().is_empty());
    }

    #[test]
    fn test_retention_drops_oldest_and_keeps_filter_view() {
        let mut store = PacketStore::with_retention(3);
        store.set_filter("tcp");
        let batch = sample();
        store.deliver(&batch);

        assert_eq!(store.len(), 3);
        assert!(Arc::ptr_eq(store.get(0).unwrap(), &batch[1]));
        let indices: Vec<usize> = store.visible_page(0, 10).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![2]);

        store.deliver(&[record("10.0.0.9", "TCP", "TCP 1 → 2")]);
        assert_eq!(store.len(), 3);
        let indices: Vec<usize> = store.visible_page(0, 10).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(store.protocol_counts().get("TCP"), Some(&2));

        store.clear_filter();
        assert_eq!(store.visible_len(), 3);
    }

    #[test]
    fn test_default_store_keeps_everything() {
        let mut store = PacketStore::new();
        assert_eq!(store.retention(), None);
        for _ in 0..50 {
            store.deliver(&sample());
        }
        assert_eq!(store.len(), 200);
        assert_eq!(PacketStore::with_retention(0).retention(), Some(1));
    }

    #[test]
    fn test_visible_page_bounds() {
        let mut store = PacketStore::new();
        store.deliver(&sample());
        assert_eq!(store.visible_page(3, 10).len(), 1);
        assert!(store.visible_page(10, 10).is_empty());
    }
}
