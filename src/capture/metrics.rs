// src/capture/metrics.rs
//
// Counters for the capture loop. Cheap to clone; every clone shares the
// same atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CaptureMetrics {
    pub attempts_started: Arc<AtomicU64>,
    pub starts_rejected: Arc<AtomicU64>,
    pub recordings: Arc<AtomicU64>,
    pub cancels: Arc<AtomicU64>,
    pub frames_accepted: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub fallback_sequences: Arc<AtomicU64>,
    pub submissions: Arc<AtomicU64>,
    pub submission_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self {
            attempts_started: Arc::new(AtomicU64::new(0)),
            starts_rejected: Arc::new(AtomicU64::new(0)),
            recordings: Arc::new(AtomicU64::new(0)),
            cancels: Arc::new(AtomicU64::new(0)),
            frames_accepted: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            fallback_sequences: Arc::new(AtomicU64::new(0)),
            submissions: Arc::new(AtomicU64::new(0)),
            submission_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            attempts_started: Self::get(&self.attempts_started),
            starts_rejected: Self::get(&self.starts_rejected),
            recordings: Self::get(&self.recordings),
            cancels: Self::get(&self.cancels),
            frames_accepted: Self::get(&self.frames_accepted),
            frames_dropped: Self::get(&self.frames_dropped),
            fallback_sequences: Self::get(&self.fallback_sequences),
            submissions: Self::get(&self.submissions),
            submission_failures: Self::get(&self.submission_failures),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub attempts_started: u64,
    pub starts_rejected: u64,
    pub recordings: u64,
    pub cancels: u64,
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub fallback_sequences: u64,
    pub submissions: u64,
    pub submission_failures: u64,
    pub elapsed_secs: f64,
}
