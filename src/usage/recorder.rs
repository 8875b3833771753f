//! Usage Recorder
//!
//! Bounded history of executor outcomes plus windowed cost aggregation.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

// == Usage Record ==
/// One completed executor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Unix milliseconds at completion
    pub timestamp: u64,
    pub requested_cost: f64,
    pub actual_cost: f64,
    pub success: bool,
    /// At least one throttle event happened during the call
    pub throttled: bool,
    /// Operation name the call was made for
    pub endpoint: String,
}

// == Usage Bucket ==
/// Aggregate of all records whose timestamp falls in `[start, start + window)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    pub start: u64,
    pub requests: usize,
    pub total_actual_cost: f64,
    pub total_requested_cost: f64,
    pub throttled: usize,
    pub failed: usize,
}

// == Usage Recorder ==
/// Ring buffer of usage records. Front = newest, back = oldest.
#[derive(Debug)]
pub struct UsageRecorder {
    records: VecDeque<UsageRecord>,
    capacity: usize,
}

impl UsageRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Rebuilds a recorder from persisted records (newest first), trimming to capacity.
    pub fn from_records(capacity: usize, records: Vec<UsageRecord>) -> Self {
        let mut recorder = Self::new(capacity);
        recorder.records = records.into_iter().take(capacity).collect();
        recorder
    }

    // == Record ==
    /// Pushes a record to the front, dropping the oldest once at capacity.
    pub fn record(&mut self, entry: UsageRecord) {
        if self.capacity == 0 {
            return;
        }
        self.records.push_front(entry);
        while self.records.len() > self.capacity {
            self.records.pop_back();
        }
    }

    // == Summarize ==
    /// Buckets records into fixed windows of `window_ms`, oldest bucket first.
    ///
    /// Windows are aligned to the Unix epoch so hourly and daily summaries line up
    /// across calls. A zero window yields an empty series.
    pub fn summarize(&self, window_ms: u64) -> Vec<UsageBucket> {
        if window_ms == 0 {
            return Vec::new();
        }

        let mut buckets: BTreeMap<u64, UsageBucket> = BTreeMap::new();
        for record in &self.records {
            let start = record.timestamp - record.timestamp % window_ms;
            let bucket = buckets.entry(start).or_insert_with(|| UsageBucket {
                start,
                ..Default::default()
            });
            bucket.requests += 1;
            bucket.total_actual_cost += record.actual_cost;
            bucket.total_requested_cost += record.requested_cost;
            if record.throttled {
                bucket.throttled += 1;
            }
            if !record.success {
                bucket.failed += 1;
            }
        }

        buckets.into_values().collect()
    }

    /// Records, newest first.
    pub fn records(&self) -> impl Iterator<Item = &UsageRecord> {
        self.records.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_at(timestamp: u64, actual_cost: f64) -> UsageRecord {
        UsageRecord {
            timestamp,
            requested_cost: actual_cost + 1.0,
            actual_cost,
            success: true,
            throttled: false,
            endpoint: "GetProduct".to_string(),
        }
    }

    #[test]
    fn test_record_evicts_oldest_at_capacity() {
        let mut recorder = UsageRecorder::new(1000);
        for i in 0..1001 {
            recorder.record(record_at(i, 1.0));
        }

        assert_eq!(recorder.len(), 1000);
        // Newest at the front, the very first record (timestamp 0) is gone.
        assert_eq!(recorder.records().next().unwrap().timestamp, 1000);
        assert_eq!(recorder.records().last().unwrap().timestamp, 1);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut recorder = UsageRecorder::new(0);
        recorder.record(record_at(1, 1.0));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_summarize_buckets_ascending() {
        let mut recorder = UsageRecorder::new(100);
        recorder.record(record_at(7_200_500, 3.0));
        recorder.record(record_at(100, 1.0));
        recorder.record(record_at(3_599_999, 2.0));
        recorder.record(UsageRecord {
            throttled: true,
            success: false,
            ..record_at(3_600_000, 4.0)
        });

        let series = recorder.summarize(3_600_000);
        let starts: Vec<u64> = series.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 3_600_000, 7_200_000]);

        assert_eq!(series[0].requests, 2);
        assert_eq!(series[0].total_actual_cost, 3.0);
        assert_eq!(series[0].total_requested_cost, 5.0);
        assert_eq!(series[1].throttled, 1);
        assert_eq!(series[1].failed, 1);
        assert_eq!(series[2].total_actual_cost, 3.0);
    }

    #[test]
    fn test_summarize_zero_window() {
        let mut recorder = UsageRecorder::new(10);
        recorder.record(record_at(5, 1.0));
        assert!(recorder.summarize(0).is_empty());
    }

    #[test]
    fn test_from_records_trims() {
        let records = (0..5).rev().map(|i| record_at(i, 1.0)).collect();
        let recorder = UsageRecorder::from_records(3, records);
        let kept: Vec<u64> = recorder.records().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![4, 3, 2]);
    }

    proptest! {
        // Bucket counts always add up to the number of retained records.
        #[test]
        fn prop_summary_accounts_for_every_record(
            stamps in prop::collection::vec(0u64..10_000_000, 0..200),
            capacity in 1usize..150,
            window in 1u64..2_000_000,
        ) {
            let mut recorder = UsageRecorder::new(capacity);
            for ts in &stamps {
                recorder.record(record_at(*ts, 1.0));
            }
            prop_assert_eq!(recorder.len(), stamps.len().min(capacity));

            let series = recorder.summarize(window);
            let total: usize = series.iter().map(|b| b.requests).sum();
            prop_assert_eq!(total, recorder.len());
            prop_assert!(series.windows(2).all(|w| w[0].start < w[1].start));
        }
    }
}
