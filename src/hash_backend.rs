//! Deterministic hash-seeded backend.
//!
//! Produces unit-length pseudo-random vectors seeded from the SHA-256 of the
//! text. Not semantic; equal texts always map to equal vectors, which is all
//! tests, demos and benchmarks need.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::embedding_generator::EmbeddingBackend;
use crate::errors::BackendError;

/// Default embedding dimension
pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashBackend {
    dimension: usize,
    latency: Option<Duration>,
}

impl Default for HashBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, latency: None }
    }

    /// Sleep this long before answering, to imitate a model
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Compute the vector synchronously
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        let mut rng = StdRng::from_seed(seed);

        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0f32))
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl EmbeddingBackend for HashBackend {
    fn compute<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, BackendError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            Ok(self.embed(text))
        })
    }

    fn name(&self) -> &str {
        "hash"
    }
}
