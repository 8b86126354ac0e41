//! Bounded, time-ordered history of detection records.
//!
//! Single writer (the stream loop), many concurrent readers (API handlers
//! and the SSE feed). One mutex with bounded critical sections keeps
//! readers from ever observing a half-applied append.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{Duration, Utc};

use crate::records::DetectionRecord;

pub struct HistoryStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    records: VecDeque<DetectionRecord>,
    latest: Option<DetectionRecord>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                latest: None,
            }),
            capacity,
        }
    }

    /// Append a record, evicting the oldest once at capacity.
    pub fn append(&self, record: DetectionRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.latest = Some(record.clone());
        inner.records.push_back(record);
    }

    /// The most recently appended record, if any.
    pub fn latest(&self) -> Option<DetectionRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest
            .clone()
    }

    /// All records with `timestamp >= now - since`, oldest first.
    pub fn history(&self, since: Duration) -> Vec<DetectionRecord> {
        let cutoff = Utc::now() - since;
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementDirection;
    use crate::records::DataSource;
    use chrono::{DateTime, Utc};

    fn record_at(timestamp: DateTime<Utc>, count: u32) -> DetectionRecord {
        DetectionRecord {
            timestamp,
            object_count: count,
            movement: MovementDirection::Stationary,
            throughput_fps: 1.0,
            source: DataSource::Sample,
        }
    }

    #[test]
    fn empty_store_has_no_latest_and_empty_history() {
        let store = HistoryStore::new(8);
        assert!(store.latest().is_none());
        assert!(store.history(Duration::minutes(15)).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn capacity_overflow_evicts_oldest_and_keeps_order() {
        let store = HistoryStore::new(5);
        let base = Utc::now();
        for i in 0..6u32 {
            store.append(record_at(base + Duration::seconds(i as i64), i));
        }

        let window = store.history(Duration::hours(1));
        assert_eq!(store.len(), 5);
        let counts: Vec<u32> = window.iter().map(|r| r.object_count).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.latest().unwrap().object_count, 5);
    }

    #[test]
    fn latest_always_matches_tail() {
        let store = HistoryStore::new(3);
        let base = Utc::now();
        for i in 0..10u32 {
            store.append(record_at(base + Duration::seconds(i as i64), i));
            let tail = store.history(Duration::hours(1)).last().cloned().unwrap();
            assert_eq!(store.latest().unwrap().object_count, tail.object_count);
        }
    }

    #[test]
    fn history_returns_only_the_recent_suffix_in_order() {
        let store = HistoryStore::new(16);
        let now = Utc::now();
        // Two stale records, three inside the window.
        store.append(record_at(now - Duration::minutes(30), 0));
        store.append(record_at(now - Duration::minutes(20), 1));
        store.append(record_at(now - Duration::minutes(10), 2));
        store.append(record_at(now - Duration::minutes(5), 3));
        store.append(record_at(now - Duration::seconds(30), 4));

        let window = store.history(Duration::minutes(15));
        let counts: Vec<u32> = window.iter().map(|r| r.object_count).collect();
        assert_eq!(counts, vec![2, 3, 4]);
    }

    #[test]
    fn zero_width_window_is_empty() {
        let store = HistoryStore::new(4);
        store.append(record_at(Utc::now() - Duration::seconds(1), 1));
        assert!(store.history(Duration::zero()).is_empty());
    }
}
