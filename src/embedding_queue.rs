//! # Priority Lanes
//!
//! Three bounded FIFO lanes (High, Medium, Low) shared between admission and
//! the dispatcher.
//!
//! ## Ordering
//! - FIFO within a lane
//! - Strict precedence across lanes: the dispatcher always drains High before
//!   Medium and Medium before Low. Sustained High traffic can starve Low.
//!
//! ## Backpressure
//! Each lane holds at most `max_lane_depth` jobs; admission checks `is_full`
//! and rejects instead of growing the lane.
//!
//! ## Wake-ups
//! Admission calls `notify_work` after pushing. The signal is a
//! `tokio::sync::Notify`, which keeps a permit when nobody is waiting, so a
//! push that races with the dispatcher going idle is never lost.

use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;

use crate::embedding_cache::Fingerprint;
use crate::types::{LaneDepths, Priority, RequestId};

/// A request waiting in a lane
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: RequestId,
    pub text: String,
    pub fingerprint: Fingerprint,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

/// The three lanes; only reachable through `PriorityLanes::lock`
#[derive(Debug)]
pub struct LaneSet {
    lanes: [VecDeque<QueuedJob>; 3],
    max_depth: usize,
}

impl LaneSet {
    fn new(max_depth: usize) -> Self {
        Self {
            lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            max_depth,
        }
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.lanes[priority.index()].len()
    }

    pub fn total(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn is_full(&self, priority: Priority) -> bool {
        self.len(priority) >= self.max_depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Append to the job's lane. Returns false if the lane is full.
    pub fn push(&mut self, job: QueuedJob) -> bool {
        if self.is_full(job.priority) {
            return false;
        }
        self.lanes[job.priority.index()].push_back(job);
        true
    }

    /// Head of the highest-priority non-empty lane
    pub fn pop_next(&mut self) -> Option<QueuedJob> {
        Priority::ALL
            .iter()
            .find_map(|priority| self.lanes[priority.index()].pop_front())
    }

    /// 1-based position of a job within its lane
    pub fn position_of(&self, id: RequestId) -> Option<usize> {
        self.lanes
            .iter()
            .find_map(|lane| lane.iter().position(|job| job.id == id))
            .map(|index| index + 1)
    }

    pub fn depths(&self) -> LaneDepths {
        LaneDepths {
            high: self.len(Priority::High),
            medium: self.len(Priority::Medium),
            low: self.len(Priority::Low),
        }
    }

    /// Remove every waiting job, highest priority first
    pub fn drain(&mut self) -> Vec<QueuedJob> {
        self.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
    }
}

/// Lanes plus the work-available signal
#[derive(Debug)]
pub struct PriorityLanes {
    lanes: Mutex<LaneSet>,
    work_available: Notify,
}

impl PriorityLanes {
    pub fn new(max_depth: usize) -> Self {
        Self {
            lanes: Mutex::new(LaneSet::new(max_depth)),
            work_available: Notify::new(),
        }
    }

    /// Exclusive access for admission's check-then-push
    pub async fn lock(&self) -> MutexGuard<'_, LaneSet> {
        self.lanes.lock().await
    }

    /// Wake the dispatcher after a push
    pub fn notify_work(&self) {
        self.work_available.notify_one();
    }

    /// Resolves once `notify_work` has been called
    pub async fn work_available(&self) {
        self.work_available.notified().await;
    }

    pub async fn pop_next(&self) -> Option<QueuedJob> {
        self.lanes.lock().await.pop_next()
    }

    pub async fn position_of(&self, id: RequestId) -> Option<usize> {
        self.lanes.lock().await.position_of(id)
    }

    pub async fn depths(&self) -> LaneDepths {
        self.lanes.lock().await.depths()
    }

    pub async fn drain(&self) -> Vec<QueuedJob> {
        self.lanes.lock().await.drain()
    }
}
