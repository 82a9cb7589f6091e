//! # Embedding Service
//!
//! Entry point for callers. An `EmbeddingService` owns the cache, lanes,
//! tracker and metrics; `start` spawns the dispatcher and the maintenance
//! sweep and hands back a `ServiceHandle` that stops them.
//!
//! ```text
//! submit ─▶ validate ─▶ cache hit? ─yes─▶ Completed (cache_hit)
//!                            │
//!                            no ─▶ lane full? ─yes─▶ CapacityError
//!                                     │
//!                                     no ─▶ Queued ─▶ dispatcher
//! ```
//!
//! The service is cheap to clone; every clone shares the same engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::dispatcher::{run_backend, Dispatcher};
use crate::embedding_cache::{EmbeddingCache, Fingerprint};
use crate::embedding_generator::EmbeddingBackend;
use crate::embedding_queue::{PriorityLanes, QueuedJob};
use crate::errors::{ServiceError, ServiceResult};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::request_tracker::{RequestRecord, RequestTracker};
use crate::types::{
    HealthReport, Priority, RequestId, RequestInfo, RequestState, ResultReport, StatusReport,
    SyncEmbedding, SystemStatus,
};
use crate::validation::validate_text;

struct ServiceInner {
    config: ServiceConfig,
    cache: Arc<EmbeddingCache>,
    tracker: Arc<RequestTracker>,
    metrics: Arc<MetricsAggregator>,
    lanes: Arc<PriorityLanes>,
    backend: Arc<dyn EmbeddingBackend>,
    dispatcher_running: Arc<AtomicBool>,
}

/// Async embedding job engine
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<ServiceInner>,
}

impl EmbeddingService {
    /// Build an engine; restores the persisted cache when `cache.persist_path`
    /// is set
    pub async fn new(
        config: ServiceConfig,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> ServiceResult<Self> {
        config.validate()?;

        let cache = Arc::new(EmbeddingCache::with_config(&config.cache)?);
        if let Some(path) = &config.cache.persist_path {
            cache.load_from_disk(path).await?;
        }

        let inner = ServiceInner {
            cache,
            tracker: Arc::new(RequestTracker::new()),
            metrics: Arc::new(MetricsAggregator::new(&config.metrics)),
            lanes: Arc::new(PriorityLanes::new(config.queue.max_lane_depth)),
            backend,
            dispatcher_running: Arc::new(AtomicBool::new(false)),
            config,
        };

        log::info!(
            "🧠 Embedding service ready (backend: {}, dimension: {})",
            inner.backend.name(),
            inner.config.embedding.dimension
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.inner.cache
    }

    pub fn is_running(&self) -> bool {
        self.inner.dispatcher_running.load(Ordering::SeqCst)
    }

    /// Spawn the dispatcher and the maintenance sweep. Only one dispatcher
    /// may run at a time.
    pub fn start(&self) -> ServiceResult<ServiceHandle> {
        let inner = &self.inner;
        if inner.dispatcher_running.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::internal("dispatcher is already running"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            inner.lanes.clone(),
            inner.cache.clone(),
            inner.tracker.clone(),
            inner.metrics.clone(),
            inner.backend.clone(),
            inner.dispatcher_running.clone(),
            inner.config.embedding.dimension,
            inner.config.queue.backend_timeout(),
            inner.config.queue.poll_interval(),
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
        let maintenance_task = tokio::spawn(self.clone().maintenance_loop(shutdown_rx));

        Ok(ServiceHandle {
            service: self.clone(),
            shutdown: shutdown_tx,
            dispatcher: Some(dispatcher_task),
            maintenance: Some(maintenance_task),
        })
    }

    async fn maintenance_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.config.tracker.sweep_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_maintenance().await;
                }
                // only `true` is ever sent, so any change means stop
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Purge old request records and expired cache entries.
    /// Returns `(records_purged, cache_entries_expired)`.
    pub async fn run_maintenance(&self) -> (usize, usize) {
        let purged = self
            .inner
            .tracker
            .purge_older_than(self.inner.config.tracker.retention())
            .await;
        let expired = self.inner.cache.remove_expired().await;
        (purged, expired)
    }

    /// Accept a request. Returns its id immediately; the embedding is
    /// available through `get_result` once the request completes.
    pub async fn submit(&self, text: &str, priority: Priority) -> ServiceResult<RequestId> {
        let inner = &self.inner;
        let normalized = validate_text(text, inner.config.embedding.max_text_length)?;
        let fingerprint = Fingerprint::of(&normalized);
        let id = Uuid::new_v4();
        let mut record = RequestRecord::new(id, normalized, priority);

        if let Some(embedding) = inner.cache.get(&fingerprint).await {
            record.mark_completed(embedding, true)?;
            inner.metrics.record_request(Some(priority), true).await;
            inner.tracker.insert(record).await?;
            log::debug!("⚡ Request {} answered from cache", id);
            return Ok(id);
        }

        let text = record.text.clone();
        {
            let mut lanes = inner.lanes.lock().await;
            if lanes.is_full(priority) {
                let max_depth = lanes.max_depth();
                drop(lanes);
                inner.metrics.record_rejection().await;
                log::warn!("🚫 Rejected {} priority request: lane is full", priority);
                return Err(ServiceError::Capacity {
                    priority,
                    max_depth,
                });
            }

            let position = lanes.len(priority) + 1;
            record.mark_queued(position)?;
            inner.tracker.insert(record).await?;
            inner.metrics.record_request(Some(priority), false).await;

            let pushed = lanes.push(QueuedJob {
                id,
                text,
                fingerprint,
                priority,
                enqueued_at: Instant::now(),
            });
            if !pushed {
                return Err(ServiceError::internal(format!(
                    "lane rejected request {} after capacity check",
                    id
                )));
            }
            log::debug!("📥 Queued request {} ({} priority, position {})", id, priority, position);
        }
        inner.lanes.notify_work();

        Ok(id)
    }

    /// Current state of a request. Queued requests report their live position.
    pub async fn get_status(&self, id: RequestId) -> ServiceResult<StatusReport> {
        let mut status = self.inner.tracker.get_status(id).await?;
        if status.state == RequestState::Queued {
            if let Some(position) = self.inner.lanes.position_of(id).await {
                status.queue_position = Some(position);
            }
        }
        Ok(status)
    }

    pub async fn get_result(&self, id: RequestId) -> ServiceResult<ResultReport> {
        self.inner.tracker.get_result(id).await
    }

    pub async fn get_info(&self, id: RequestId) -> ServiceResult<RequestInfo> {
        self.inner.tracker.get_info(id).await
    }

    /// Wait up to `timeout` for a request to finish, then report its result.
    /// An unfinished request is reported as `NotReady`.
    pub async fn wait_for_result(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> ServiceResult<ResultReport> {
        match tokio::time::timeout(timeout, self.inner.tracker.wait_for_terminal(id)).await {
            Ok(state) => {
                state?;
            }
            Err(_) => log::debug!("⏳ Request {} still running after {:?}", id, timeout),
        }
        self.get_result(id).await
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot().await
    }

    pub async fn reset_metrics(&self) {
        self.inner.metrics.reset().await;
    }

    /// Compute an embedding inline, bypassing the lanes and the tracker
    pub async fn embed_sync(&self, text: &str, use_cache: bool) -> ServiceResult<SyncEmbedding> {
        let inner = &self.inner;
        let normalized = validate_text(text, inner.config.embedding.max_text_length)?;
        let fingerprint = Fingerprint::of(&normalized);

        if use_cache {
            if let Some(embedding) = inner.cache.get(&fingerprint).await {
                inner.metrics.record_request(None, true).await;
                return Ok(SyncEmbedding {
                    embedding,
                    cache_hit: true,
                });
            }
        }

        inner.metrics.record_request(None, false).await;
        let started = Instant::now();
        let outcome = run_backend(
            inner.backend.clone(),
            normalized,
            inner.config.embedding.dimension,
            inner.config.queue.backend_timeout(),
        )
        .await;

        match outcome {
            Ok(embedding) => {
                if use_cache {
                    inner.cache.set(fingerprint, embedding.clone()).await;
                }
                inner.metrics.record_success(started.elapsed(), None).await;
                Ok(SyncEmbedding {
                    embedding,
                    cache_hit: false,
                })
            }
            Err(e) => {
                log::warn!("⚠️ Inline embedding failed: {}", e);
                inner.metrics.record_failure(None).await;
                Err(e)
            }
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let metrics = self.inner.metrics.snapshot().await;
        let lane_depths = self.inner.lanes.depths().await;
        let cache_entries = self.inner.cache.len().await;
        let dispatcher_running = self.is_running();

        SystemStatus {
            status: if dispatcher_running { "running" } else { "stopped" }.to_string(),
            dispatcher_running,
            lane_depths,
            in_flight: metrics.in_flight,
            cache_entries,
            cache_hit_ratio: metrics.cache_hit_ratio,
            total_requests_processed: metrics.cache_hits + metrics.cache_misses + metrics.failures,
            avg_processing_time_ms: metrics.avg_processing_time_ms,
            uptime_seconds: metrics.uptime_seconds,
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Owns the background tasks started by `EmbeddingService::start`.
///
/// Dropping the handle signals the tasks to stop without waiting for them;
/// call `shutdown` to wait and to persist the cache.
pub struct ServiceHandle {
    service: EmbeddingService,
    shutdown: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn service(&self) -> &EmbeddingService {
        &self.service
    }

    /// Stop the dispatcher after its current item, fail whatever is still
    /// queued and save the cache if persistence is configured
    pub async fn shutdown(mut self) -> ServiceResult<()> {
        log::info!("🛑 Shutting down embedding service");
        // Receivers may already be gone if both tasks exited
        let _ = self.shutdown.send(true);

        if let Some(task) = self.dispatcher.take() {
            task.await
                .map_err(|e| ServiceError::internal(format!("dispatcher task failed: {}", e)))?;
        }
        if let Some(task) = self.maintenance.take() {
            task.await
                .map_err(|e| ServiceError::internal(format!("maintenance task failed: {}", e)))?;
        }

        if let Some(path) = &self.service.inner.config.cache.persist_path {
            self.service.inner.cache.save_to_disk(path).await?;
        }

        Ok(())
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            let _ = self.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_backend::HashBackend;

    fn small_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.embedding.dimension = 8;
        config.queue.max_lane_depth = 2;
        config.queue.dispatcher_poll_interval_ms = 10;
        config.metrics.min_samples_for_percentile = 1;
        config
    }

    async fn service() -> EmbeddingService {
        EmbeddingService::new(small_config(), Arc::new(HashBackend::new(8)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = small_config();
        config.cache.max_size = 0;
        let result = EmbeddingService::new(config, Arc::new(HashBackend::new(8))).await;
        assert!(matches!(result, Err(ServiceError::Config { .. })));
    }

    #[tokio::test]
    async fn test_submit_without_dispatcher_stays_queued() {
        let service = service().await;
        let first = service.submit("one", Priority::Low).await.unwrap();
        let second = service.submit("two", Priority::Low).await.unwrap();

        let status = service.get_status(second).await.unwrap();
        assert_eq!(status.state, RequestState::Queued);
        assert_eq!(status.queue_position, Some(2));
        assert_eq!(
            service.get_result(first).await.unwrap(),
            ResultReport::NotReady { state: RequestState::Queued }
        );
    }

    #[tokio::test]
    async fn test_full_lane_rejects_without_record() {
        let service = service().await;
        service.submit("a", Priority::High).await.unwrap();
        service.submit("b", Priority::High).await.unwrap();

        let err = service.submit("c", Priority::High).await.unwrap_err();
        assert_eq!(err, ServiceError::Capacity { priority: Priority::High, max_depth: 2 });
        assert_eq!(err.status_code(), 429);

        assert_eq!(service.inner.tracker.len().await, 2);
        let metrics = service.get_metrics().await;
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.total_requests, 2);

        // other lanes are unaffected
        service.submit("c", Priority::Low).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let service = service().await;
        let handle = service.start().unwrap();
        assert!(service.is_running());
        assert!(service.start().is_err());

        handle.shutdown().await.unwrap();
        assert!(!service.is_running());
        let second = service.start().unwrap();
        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_sync_uses_cache() {
        let service = service().await;
        let first = service.embed_sync("inline text", true).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.embedding.len(), 8);

        let second = service.embed_sync("  inline   text ", true).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.embedding, second.embedding);

        let uncached = service.embed_sync("other", false).await.unwrap();
        assert!(!uncached.cache_hit);
        assert_eq!(service.cache().len().await, 1);

        let metrics = service.get_metrics().await;
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.requests_by_priority.high, 0);
        assert!(metrics.is_balanced());
    }

    #[tokio::test]
    async fn test_system_status_and_health() {
        let service = service().await;
        service.submit("queued", Priority::Medium).await.unwrap();

        let status = service.system_status().await;
        assert!(!status.dispatcher_running);
        assert_eq!(status.status, "stopped");
        assert_eq!(status.lane_depths.medium, 1);
        assert_eq!(status.in_flight, 1);

        let health = service.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
