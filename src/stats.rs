//! Shared detection statistics.
//!
//! The store is the only state shared between the monitor thread and stats
//! consumers. Every read and write takes the one lock, and snapshots are
//! copied out before the lock is released.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::classifier::{labels, Classification};

pub const DEFAULT_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub label: String,
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub packet_count: u64,
}

impl DetectionResult {
    pub fn new(classification: Classification, packet_count: u64) -> Self {
        DetectionResult {
            label: classification.label,
            confidence: classification.confidence,
            timestamp: Utc::now(),
            packet_count,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.label == labels::NORMAL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_packets_processed: u64,
    pub windows_processed: u64,
    pub label_counts: BTreeMap<String, u64>,
    pub last_label: String,
    pub last_detection_timestamp: Option<DateTime<Utc>>,
    /// Recent non-normal detections, oldest first.
    pub history: Vec<DetectionResult>,
    pub packets_dropped: u64,
}

impl StatsSnapshot {
    pub fn label_count(&self, label: &str) -> u64 {
        self.label_counts.get(label).copied().unwrap_or(0)
    }

    pub fn total_attacks(&self) -> u64 {
        self.label_counts
            .iter()
            .filter(|(label, _)| label.as_str() != labels::NORMAL)
            .map(|(_, count)| count)
            .sum()
    }

    /// Share of windows that were not classified as normal.
    pub fn attack_rate_percentage(&self) -> f64 {
        if self.windows_processed == 0 {
            return 0.0;
        }
        self.total_attacks() as f64 / self.windows_processed as f64 * 100.0
    }

    pub fn recent(&self, n: usize) -> &[DetectionResult] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

#[derive(Debug)]
struct StatsState {
    total_packets_processed: u64,
    windows_processed: u64,
    label_counts: BTreeMap<String, u64>,
    last_label: String,
    last_detection_timestamp: Option<DateTime<Utc>>,
    history: VecDeque<DetectionResult>,
    // drop counter value at the last reset
    dropped_baseline: u64,
}

impl StatsState {
    fn initial(dropped_baseline: u64) -> Self {
        StatsState {
            total_packets_processed: 0,
            windows_processed: 0,
            label_counts: labels::SEEDED
                .iter()
                .map(|label| (label.to_string(), 0))
                .collect(),
            last_label: labels::NORMAL.to_string(),
            last_detection_timestamp: None,
            history: VecDeque::new(),
            dropped_baseline,
        }
    }
}

pub struct StatsStore {
    state: Mutex<StatsState>,
    history_cap: usize,
    dropped: Arc<AtomicU64>,
}

impl StatsStore {
    pub fn new(history_cap: usize) -> Self {
        Self::with_drop_counter(history_cap, Arc::new(AtomicU64::new(0)))
    }

    /// Creates a store that reports drops from a counter owned elsewhere,
    /// normally the ingress queue.
    pub fn with_drop_counter(history_cap: usize, dropped: Arc<AtomicU64>) -> Self {
        let baseline = dropped.load(Ordering::SeqCst);
        StatsStore {
            state: Mutex::new(StatsState::initial(baseline)),
            history_cap: history_cap.max(1),
            dropped,
        }
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Applies one closed window to the counters in a single critical
    /// section.
    pub fn record_window(&self, detection: DetectionResult) {
        let mut state = self.state.lock();

        state.total_packets_processed += detection.packet_count;
        state.windows_processed += 1;
        *state.label_counts.entry(detection.label.clone()).or_insert(0) += 1;
        state.last_label = detection.label.clone();

        if !detection.is_normal() {
            state.last_detection_timestamp = Some(detection.timestamp);
            if state.history.len() >= self.history_cap {
                state.history.pop_front();
            }
            state.history.push_back(detection);
        }
    }

    pub fn get_snapshot(&self) -> StatsSnapshot {
        let dropped = self.dropped.load(Ordering::SeqCst);
        let state = self.state.lock();

        StatsSnapshot {
            total_packets_processed: state.total_packets_processed,
            windows_processed: state.windows_processed,
            label_counts: state.label_counts.clone(),
            last_label: state.last_label.clone(),
            last_detection_timestamp: state.last_detection_timestamp,
            history: state.history.iter().cloned().collect(),
            packets_dropped: dropped.saturating_sub(state.dropped_baseline),
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = StatsState::initial(self.dropped.load(Ordering::SeqCst));
        log::info!("Detection statistics reset");
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}
