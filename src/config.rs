//! Service configuration.
//!
//! Values only; where they come from is up to the host. `ServiceConfig::load`
//! reads a JSON file in which every section and field is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ServiceError, ServiceResult};

/// Configuration for the embedding cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub max_size: usize,
    /// Time-to-live for cache entries in seconds
    pub ttl_seconds: u64,
    /// Snapshot file loaded at startup and written on shutdown
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_seconds: 3600,
            persist_path: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Configuration for the priority lanes and dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of waiting requests per lane
    pub max_lane_depth: usize,
    /// Upper bound on how long an idle dispatcher sleeps between lane scans
    pub dispatcher_poll_interval_ms: u64,
    /// Backend call timeout in milliseconds
    pub backend_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_lane_depth: 1000,
            dispatcher_poll_interval_ms: 500,
            backend_timeout_ms: 30_000, // 30 seconds
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatcher_poll_interval_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of processing-time samples kept for mean and p95
    pub window_size: usize,
    /// Below this many samples p95 is reported as absent
    pub min_samples_for_percentile: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            min_samples_for_percentile: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Terminal records older than this are purged
    pub retention_seconds: u64,
    /// How often the maintenance sweep runs
    pub sweep_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 24 * 3600,
            sweep_interval_ms: 60_000, // Every minute
        }
    }
}

impl TrackerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Dimensionality every backend vector must have
    pub dimension: usize,
    /// Maximum normalized text length in characters
    pub max_text_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_text_length: 10_000,
        }
    }
}

/// Top-level configuration consumed by `EmbeddingService`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub metrics: MetricsConfig,
    pub tracker: TrackerConfig,
    pub embedding: EmbeddingConfig,
}

impl ServiceConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> ServiceResult<Self> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ServiceError::config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&contents)?;
        log::info!("📄 Loaded service configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> ServiceResult<()> {
        if self.cache.max_size == 0 {
            return Err(ServiceError::config("cache.max_size must be greater than zero"));
        }
        if self.queue.max_lane_depth == 0 {
            return Err(ServiceError::config("queue.max_lane_depth must be greater than zero"));
        }
        if self.queue.backend_timeout_ms == 0 {
            return Err(ServiceError::config("queue.backend_timeout_ms must be greater than zero"));
        }
        if self.queue.dispatcher_poll_interval_ms == 0 {
            return Err(ServiceError::config(
                "queue.dispatcher_poll_interval_ms must be greater than zero",
            ));
        }
        if self.metrics.window_size == 0 {
            return Err(ServiceError::config("metrics.window_size must be greater than zero"));
        }
        if self.metrics.min_samples_for_percentile > self.metrics.window_size {
            return Err(ServiceError::config(format!(
                "metrics.min_samples_for_percentile ({}) exceeds metrics.window_size ({})",
                self.metrics.min_samples_for_percentile, self.metrics.window_size
            )));
        }
        if self.tracker.sweep_interval_ms == 0 {
            return Err(ServiceError::config("tracker.sweep_interval_ms must be greater than zero"));
        }
        if self.embedding.dimension == 0 {
            return Err(ServiceError::config("embedding.dimension must be greater than zero"));
        }
        if self.embedding.max_text_length == 0 {
            return Err(ServiceError::config("embedding.max_text_length must be greater than zero"));
        }
        Ok(())
    }
}
