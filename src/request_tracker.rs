//! Per-request lifecycle records.
//!
//! Every request accepted by admission gets exactly one `RequestRecord`. The
//! record moves through `Submitted → Queued → Processing → Completed | Failed`
//! (or `Submitted → Completed` on a cache hit) and each transition stamps the
//! timestamp that belongs to it. Timestamps never go backwards within one
//! record even if the wall clock does.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

use crate::errors::{ServiceError, ServiceResult};
use crate::types::{
    Priority, RequestId, RequestInfo, RequestState, ResultReport, StateCounts, StatusReport,
};
use crate::validation::text_preview;

/// Typed record for one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub id: RequestId,
    pub text: String,
    pub priority: Priority,
    pub state: RequestState,
    pub submitted_at: DateTime<Utc>,
    pub queue_entered_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cache_hit: bool,
    pub error: Option<String>,
    /// Position in the lane at admission, only meaningful while queued
    pub queue_position: Option<usize>,
    pub result: Option<Vec<f32>>,
}

impl RequestRecord {
    /// Create a record in the `Submitted` state
    pub fn new(id: RequestId, text: String, priority: Priority) -> Self {
        Self {
            id,
            text,
            priority,
            state: RequestState::Submitted,
            submitted_at: Utc::now(),
            queue_entered_at: None,
            processing_started_at: None,
            completed_at: None,
            cache_hit: false,
            error: None,
            queue_position: None,
            result: None,
        }
    }

    /// Current time, clamped to the latest timestamp already recorded
    fn next_timestamp(&self) -> DateTime<Utc> {
        let latest = [
            Some(self.submitted_at),
            self.queue_entered_at,
            self.processing_started_at,
            self.completed_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.submitted_at);

        Utc::now().max(latest)
    }

    fn transition(&mut self, next: RequestState) -> ServiceResult<DateTime<Utc>> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceError::internal(format!(
                "request {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        let timestamp = self.next_timestamp();
        self.state = next;
        Ok(timestamp)
    }

    /// Submitted → Queued
    pub fn mark_queued(&mut self, position: usize) -> ServiceResult<()> {
        let timestamp = self.transition(RequestState::Queued)?;
        self.queue_entered_at = Some(timestamp);
        self.queue_position = Some(position);
        Ok(())
    }

    /// Queued → Processing
    pub fn mark_processing(&mut self) -> ServiceResult<()> {
        let timestamp = self.transition(RequestState::Processing)?;
        self.processing_started_at = Some(timestamp);
        self.queue_position = None;
        Ok(())
    }

    /// Submitted → Completed (admission cache hit) or Processing → Completed
    pub fn mark_completed(&mut self, embedding: Vec<f32>, cache_hit: bool) -> ServiceResult<()> {
        let timestamp = self.transition(RequestState::Completed)?;
        self.completed_at = Some(timestamp);
        self.result = Some(embedding);
        self.cache_hit = cache_hit;
        self.queue_position = None;
        Ok(())
    }

    /// Processing → Failed, or Queued → Failed when abandoned at shutdown
    pub fn mark_failed(&mut self, error: impl Into<String>) -> ServiceResult<()> {
        let timestamp = self.transition(RequestState::Failed)?;
        self.completed_at = Some(timestamp);
        self.error = Some(error.into());
        self.queue_position = None;
        Ok(())
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            request_id: self.id,
            state: self.state,
            cache_hit: self.cache_hit,
            queue_position: match self.state {
                RequestState::Queued => self.queue_position,
                _ => None,
            },
            error: match self.state {
                RequestState::Failed => self.error.clone(),
                _ => None,
            },
        }
    }

    pub fn result_report(&self) -> ResultReport {
        match (self.state, &self.result, &self.error) {
            (RequestState::Completed, Some(embedding), _) => ResultReport::Ready {
                embedding: embedding.clone(),
                cache_hit: self.cache_hit,
            },
            (RequestState::Failed, _, error) => ResultReport::Failed {
                error: error.clone().unwrap_or_else(|| "unknown error".to_string()),
            },
            (RequestState::Completed, None, _) => ResultReport::Failed {
                error: "completed without a result".to_string(),
            },
            (state, _, _) => ResultReport::NotReady { state },
        }
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            request_id: self.id,
            text_preview: text_preview(&self.text),
            priority: self.priority,
            state: self.state,
            cache_hit: self.cache_hit,
            queue_position: self.status_report().queue_position,
            error: self.error.clone(),
            submitted_at: self.submitted_at,
            queue_entered_at: self.queue_entered_at,
            processing_started_at: self.processing_started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Table of request records keyed by id
#[derive(Debug, Default)]
pub struct RequestTracker {
    records: RwLock<HashMap<RequestId, RequestRecord>>,
    /// Woken whenever a record reaches Completed or Failed
    finished: Notify,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a record; ids must be unique
    pub async fn insert(&self, record: RequestRecord) -> ServiceResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(ServiceError::internal(format!("duplicate request id {}", record.id)));
        }
        records.insert(record.id, record);
        Ok(())
    }

    /// Apply `update` to a record under the write lock
    pub async fn update<F, T>(&self, id: RequestId, update: F) -> ServiceResult<T>
    where
        F: FnOnce(&mut RequestRecord) -> ServiceResult<T>,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(ServiceError::NotFound { id })?;
        let was_terminal = record.state.is_terminal();
        let outcome = update(record);
        if !was_terminal && record.state.is_terminal() {
            self.finished.notify_waiters();
        }
        outcome
    }

    /// Wait until the record is Completed or Failed and return that state
    pub async fn wait_for_terminal(&self, id: RequestId) -> ServiceResult<RequestState> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.get_status(id).await?.state;
            if state.is_terminal() {
                return Ok(state);
            }
            notified.await;
        }
    }

    pub async fn mark_processing(&self, id: RequestId) -> ServiceResult<()> {
        self.update(id, |record| record.mark_processing()).await
    }

    pub async fn mark_completed(
        &self,
        id: RequestId,
        embedding: Vec<f32>,
        cache_hit: bool,
    ) -> ServiceResult<()> {
        self.update(id, |record| record.mark_completed(embedding, cache_hit)).await
    }

    pub async fn mark_failed(&self, id: RequestId, error: impl Into<String>) -> ServiceResult<()> {
        let error = error.into();
        self.update(id, |record| record.mark_failed(error)).await
    }

    /// Clone of the full record
    pub async fn get(&self, id: RequestId) -> Option<RequestRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn get_status(&self, id: RequestId) -> ServiceResult<StatusReport> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(RequestRecord::status_report)
            .ok_or(ServiceError::NotFound { id })
    }

    pub async fn get_result(&self, id: RequestId) -> ServiceResult<ResultReport> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(RequestRecord::result_report)
            .ok_or(ServiceError::NotFound { id })
    }

    pub async fn get_info(&self, id: RequestId) -> ServiceResult<RequestInfo> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(RequestRecord::info)
            .ok_or(ServiceError::NotFound { id })
    }

    /// Drop terminal records submitted at least `max_age` ago
    pub async fn purge_older_than(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();

        records.retain(|_, record| {
            if !record.state.is_terminal() {
                return true;
            }
            let age = (now - record.submitted_at).to_std().unwrap_or(Duration::ZERO);
            age < max_age
        });

        let purged = before - records.len();
        if purged > 0 {
            log::info!("🧹 Purged {} finished request records", purged);
        }
        purged
    }

    pub async fn counts(&self) -> StateCounts {
        let records = self.records.read().await;
        let mut counts = StateCounts::default();
        for record in records.values() {
            match record.state {
                RequestState::Submitted => counts.submitted += 1,
                RequestState::Queued => counts.queued += 1,
                RequestState::Processing => counts.processing += 1,
                RequestState::Completed => counts.completed += 1,
                RequestState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
