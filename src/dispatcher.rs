//! # Dispatcher
//!
//! Single background loop that takes jobs from the priority lanes and turns
//! them into embeddings.
//!
//! For each job:
//! 1. Tracker moves it to `Processing`
//! 2. The cache is checked again; an identical request may have filled it
//!    while this one was waiting
//! 3. Otherwise the backend runs in its own task, bounded by the backend
//!    timeout. A panic in the backend becomes an internal error instead of
//!    killing the loop.
//! 4. Cache, metrics and tracker are updated; metrics before the tracker so a
//!    caller that observes a terminal state also sees it counted
//!
//! The loop sleeps on the lanes' work signal with a poll interval as a
//! fallback and stops when the shutdown watch flips to `true`. Jobs still
//! waiting at that point are failed, never silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::embedding_cache::EmbeddingCache;
use crate::embedding_generator::EmbeddingBackend;
use crate::embedding_queue::{PriorityLanes, QueuedJob};
use crate::errors::{BackendError, ServiceError, ServiceResult};
use crate::metrics::MetricsAggregator;
use crate::request_tracker::RequestTracker;

/// Error recorded on requests abandoned at shutdown
pub const SHUTDOWN_ERROR: &str = "service shutting down";

/// Run one backend call in its own task under `timeout` and check the
/// dimension of the returned vector
pub(crate) async fn run_backend(
    backend: Arc<dyn EmbeddingBackend>,
    text: String,
    dimension: usize,
    timeout: Duration,
) -> ServiceResult<Vec<f32>> {
    let mut task = tokio::spawn(async move { backend.compute(&text).await });

    let embedding = match tokio::time::timeout(timeout, &mut task).await {
        Err(_) => {
            task.abort();
            return Err(ServiceError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(Err(join_error)) => {
            return Err(ServiceError::internal(format!(
                "embedding task failed: {}",
                join_error
            )));
        }
        Ok(Ok(result)) => result?,
    };

    if embedding.len() != dimension {
        return Err(BackendError::DimensionMismatch {
            expected: dimension,
            actual: embedding.len(),
        }
        .into());
    }

    Ok(embedding)
}

pub(crate) struct Dispatcher {
    lanes: Arc<PriorityLanes>,
    cache: Arc<EmbeddingCache>,
    tracker: Arc<RequestTracker>,
    metrics: Arc<MetricsAggregator>,
    backend: Arc<dyn EmbeddingBackend>,
    running: Arc<AtomicBool>,
    dimension: usize,
    backend_timeout: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        lanes: Arc<PriorityLanes>,
        cache: Arc<EmbeddingCache>,
        tracker: Arc<RequestTracker>,
        metrics: Arc<MetricsAggregator>,
        backend: Arc<dyn EmbeddingBackend>,
        running: Arc<AtomicBool>,
        dimension: usize,
        backend_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            lanes,
            cache,
            tracker,
            metrics,
            backend,
            running,
            dimension,
            backend_timeout,
            poll_interval,
        }
    }

    /// Process jobs until `shutdown` becomes true or its sender is dropped
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log::info!("🚀 Dispatcher started (backend: {})", self.backend.name());

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.lanes.pop_next().await {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        _ = self.lanes.work_available() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let abandoned = self.abandon_pending().await;
        self.running.store(false, Ordering::SeqCst);
        log::info!("🛑 Dispatcher stopped ({} queued requests failed)", abandoned);
    }

    async fn process(&self, job: QueuedJob) {
        let queue_wait = job.enqueued_at.elapsed();

        if let Err(e) = self.tracker.mark_processing(job.id).await {
            log::error!("❌ Could not start request {}: {}", job.id, e);
            self.metrics.record_failure(Some(queue_wait)).await;
            return;
        }

        if let Some(embedding) = self.cache.get(&job.fingerprint).await {
            log::debug!("⚡ Request {} served from cache at dispatch", job.id);
            self.metrics.record_late_cache_hit(Some(queue_wait)).await;
            if let Err(e) = self.tracker.mark_completed(job.id, embedding, true).await {
                log::error!("❌ Could not complete request {}: {}", job.id, e);
            }
            return;
        }

        let started = Instant::now();
        let outcome = run_backend(
            self.backend.clone(),
            job.text,
            self.dimension,
            self.backend_timeout,
        )
        .await;
        let processing_time = started.elapsed();

        match outcome {
            Ok(embedding) => {
                self.cache.set(job.fingerprint, embedding.clone()).await;
                self.metrics
                    .record_success(processing_time, Some(queue_wait))
                    .await;
                if let Err(e) = self.tracker.mark_completed(job.id, embedding, false).await {
                    log::error!("❌ Could not complete request {}: {}", job.id, e);
                    return;
                }
                log::debug!(
                    "✅ Request {} ({}) embedded in {:.1}ms",
                    job.id,
                    job.priority,
                    processing_time.as_secs_f64() * 1000.0
                );
            }
            Err(error) => {
                log::warn!("⚠️ Request {} failed: {}", job.id, error);
                self.metrics.record_failure(Some(queue_wait)).await;
                if let Err(e) = self.tracker.mark_failed(job.id, error.to_string()).await {
                    log::error!("❌ Could not record failure of {}: {}", job.id, e);
                }
            }
        }
    }

    /// Fail every job still waiting in the lanes
    async fn abandon_pending(&self) -> usize {
        let pending = self.lanes.drain().await;
        let count = pending.len();

        for job in pending {
            self.metrics
                .record_failure(Some(job.enqueued_at.elapsed()))
                .await;
            if let Err(e) = self.tracker.mark_failed(job.id, SHUTDOWN_ERROR).await {
                log::error!("❌ Could not fail request {}: {}", job.id, e);
            }
        }

        count
    }
}
