//! Asynchronous embedding job engine.
//!
//! Requests are admitted into three priority lanes, answered from a TTL+LRU
//! cache when possible, computed by a pluggable `EmbeddingBackend` otherwise,
//! and tracked until a caller collects the result.

// Module declarations
pub mod config;
pub mod dispatcher;
pub mod embedding_cache;
pub mod embedding_generator;
pub mod embedding_queue;
pub mod errors;
pub mod hash_backend;
pub mod metrics;
pub mod request_tracker;
pub mod service;
pub mod types;
pub mod validation;

// Re-exports for commonly used types
pub use config::{CacheConfig, EmbeddingConfig, MetricsConfig, QueueConfig, ServiceConfig, TrackerConfig};
pub use embedding_cache::{CacheStats, EmbeddingCache, Fingerprint};
pub use embedding_generator::{EmbeddingBackend, OllamaBackend, OllamaConfig};
pub use errors::{BackendError, ServiceError, ServiceResult};
pub use hash_backend::HashBackend;
pub use metrics::MetricsSnapshot;
pub use service::{EmbeddingService, ServiceHandle};
pub use types::{
    HealthReport, LaneDepths, Priority, PriorityCounts, RequestId, RequestInfo, RequestState,
    ResultReport, StateCounts, StatusReport, SyncEmbedding, SystemStatus,
};
