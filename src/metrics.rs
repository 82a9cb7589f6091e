//! Request metrics aggregation.
//!
//! Counters and the processing-time ring buffer live in one struct behind a
//! single `RwLock`: a snapshot is always internally consistent and a reset
//! replaces everything at once.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::MetricsConfig;
use crate::types::{Priority, PriorityCounts};

/// Immutable copy of the aggregated metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    /// Requests answered by the backend
    pub cache_misses: u64,
    pub failures: u64,
    /// Accepted requests not yet completed or failed
    pub in_flight: u64,
    /// Submissions refused because a lane was full
    pub rejected: u64,
    pub requests_by_priority: PriorityCounts,
    pub cache_hit_ratio: f64,
    pub avg_processing_time_ms: f64,
    /// `None` until enough samples were collected
    pub p95_processing_time_ms: Option<f64>,
    pub sample_count: usize,
    pub avg_queue_wait_ms: f64,
    pub epoch: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// `total == hits + misses + failures + in_flight`
    pub fn is_balanced(&self) -> bool {
        self.total_requests == self.cache_hits + self.cache_misses + self.failures + self.in_flight
    }
}

struct MetricsState {
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    failures: u64,
    in_flight: u64,
    rejected: u64,
    requests_by_priority: PriorityCounts,
    processing_samples_ms: VecDeque<f64>,
    queue_wait_total_ms: f64,
    queue_wait_count: u64,
    epoch: DateTime<Utc>,
    started: Instant,
}

impl MetricsState {
    fn new(window_size: usize) -> Self {
        Self {
            total_requests: 0,
            cache_hits: 0,
            cache_misses: 0,
            failures: 0,
            in_flight: 0,
            rejected: 0,
            requests_by_priority: PriorityCounts::default(),
            processing_samples_ms: VecDeque::with_capacity(window_size),
            queue_wait_total_ms: 0.0,
            queue_wait_count: 0,
            epoch: Utc::now(),
            started: Instant::now(),
        }
    }

    fn finish_in_flight(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn record_queue_wait(&mut self, queue_wait: Option<Duration>) {
        if let Some(wait) = queue_wait {
            self.queue_wait_total_ms += duration_ms(wait);
            self.queue_wait_count += 1;
        }
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

/// Aggregates counters and rolling processing-time statistics
pub struct MetricsAggregator {
    state: RwLock<MetricsState>,
    window_size: usize,
    min_samples_for_percentile: usize,
}

impl MetricsAggregator {
    pub fn new(config: &MetricsConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            state: RwLock::new(MetricsState::new(window_size)),
            window_size,
            min_samples_for_percentile: config.min_samples_for_percentile,
        }
    }

    /// Count an accepted request. Misses stay in flight until they finish.
    pub async fn record_request(&self, priority: Option<Priority>, cache_hit: bool) {
        let mut state = self.state.write().await;
        state.total_requests += 1;
        if let Some(priority) = priority {
            state.requests_by_priority.increment(priority);
        }
        if cache_hit {
            state.cache_hits += 1;
        } else {
            state.in_flight += 1;
        }
    }

    pub async fn record_rejection(&self) {
        self.state.write().await.rejected += 1;
    }

    /// An in-flight request finished with a backend-computed vector
    pub async fn record_success(&self, processing_time: Duration, queue_wait: Option<Duration>) {
        let mut state = self.state.write().await;
        state.finish_in_flight();
        state.cache_misses += 1;
        state.record_queue_wait(queue_wait);

        if state.processing_samples_ms.len() >= self.window_size {
            state.processing_samples_ms.pop_front();
        }
        state
            .processing_samples_ms
            .push_back(duration_ms(processing_time));
    }

    /// An in-flight request found its vector in the cache at dispatch time
    pub async fn record_late_cache_hit(&self, queue_wait: Option<Duration>) {
        let mut state = self.state.write().await;
        state.finish_in_flight();
        state.cache_hits += 1;
        state.record_queue_wait(queue_wait);
    }

    pub async fn record_failure(&self, queue_wait: Option<Duration>) {
        let mut state = self.state.write().await;
        state.finish_in_flight();
        state.failures += 1;
        state.record_queue_wait(queue_wait);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().await;

        let mut sorted: Vec<f64> = state.processing_samples_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let sample_count = sorted.len();

        let avg_processing_time_ms = if sample_count > 0 {
            sorted.iter().sum::<f64>() / sample_count as f64
        } else {
            0.0
        };
        let p95_processing_time_ms = if sample_count >= self.min_samples_for_percentile {
            percentile(&sorted, 95.0)
        } else {
            None
        };

        let answered = state.cache_hits + state.cache_misses;

        MetricsSnapshot {
            total_requests: state.total_requests,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            failures: state.failures,
            in_flight: state.in_flight,
            rejected: state.rejected,
            requests_by_priority: state.requests_by_priority,
            cache_hit_ratio: if answered > 0 {
                state.cache_hits as f64 / answered as f64
            } else {
                0.0
            },
            avg_processing_time_ms,
            p95_processing_time_ms,
            sample_count,
            avg_queue_wait_ms: if state.queue_wait_count > 0 {
                state.queue_wait_total_ms / state.queue_wait_count as f64
            } else {
                0.0
            },
            epoch: state.epoch,
            uptime_seconds: state.started.elapsed().as_secs(),
        }
    }

    /// Zero every counter, drop all samples and start a new epoch.
    ///
    /// Requests still in flight keep counting against the gauge so that the
    /// gauge does not go negative when they finish.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let in_flight = state.in_flight;
        *state = MetricsState::new(self.window_size);
        state.in_flight = in_flight;
        state.total_requests = in_flight;
        log::info!("🔄 Metrics reset, new epoch {}", state.epoch);
    }

    pub async fn epoch(&self) -> DateTime<Utc> {
        self.state.read().await.epoch
    }
}
