use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::detect::backend::{InferenceBackend, ModelProvider};
use crate::detect::result::{BoundingBox, RawDetection, BOX_SPACE};
use crate::frame::Frame;

/// Labels the stub backend draws from.
const STUB_LABELS: &[&str] = &[
    "person",
    "truck",
    "hard hat",
    "safety vest",
    "smoke",
    "chair",
    "machine",
    "backpack",
];

/// Stub backend for demos and tests. Derives detections from a hash of the pixels,
/// so identical frames always produce identical results.
pub struct StubBackend {
    name: String,
    latency: Duration,
}

impl StubBackend {
    pub fn new(model: &str) -> Self {
        Self {
            name: format!("stub:{}", model),
            latency: Duration::ZERO,
        }
    }

    /// Simulated per-call inference latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn detections_for(digest: &[u8; 32]) -> Vec<RawDetection> {
        let count = (digest[0] % 4) as usize;
        (0..count)
            .map(|i| {
                let b = &digest[1 + i * 7..8 + i * 7];
                let label = STUB_LABELS[b[0] as usize % STUB_LABELS.len()];
                let score = 0.3 + (b[1] as f32 / 255.0) * 0.7;
                let xmin = b[2] as f32 / 255.0 * (BOX_SPACE * 0.7);
                let ymin = b[3] as f32 / 255.0 * (BOX_SPACE * 0.7);
                let w = 50.0 + b[4] as f32 / 255.0 * (BOX_SPACE * 0.25);
                let h = 50.0 + b[5] as f32 / 255.0 * (BOX_SPACE * 0.25);
                RawDetection::new(label, score, BoundingBox::new(xmin, ymin, xmin + w, ymin + h))
            })
            .collect()
    }
}

#[async_trait]
impl InferenceBackend for StubBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        Ok(Self::detections_for(&digest))
    }
}

/// Provider for stub backends. Individual model names can be marked as failing to
/// exercise fallback and retry paths.
#[derive(Default)]
pub struct StubProvider {
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
    load_latency: Duration,
    infer_latency: Duration,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load of `model` fail.
    pub fn with_failing(self, model: &str) -> Self {
        self.set_failing(model, true);
        self
    }

    pub fn with_load_latency(mut self, latency: Duration) -> Self {
        self.load_latency = latency;
        self
    }

    pub fn with_infer_latency(mut self, latency: Duration) -> Self {
        self.infer_latency = latency;
        self
    }

    pub fn set_failing(&self, model: &str, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(model.to_string());
            } else {
                set.remove(model);
            }
        }
    }

    /// Model names passed to `load`, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn load(&self, model: &str) -> Result<Box<dyn InferenceBackend>> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(model.to_string());
        }
        if !self.load_latency.is_zero() {
            tokio::time::sleep(self.load_latency).await;
        }
        let fails = self
            .failing
            .lock()
            .map(|set| set.contains(model))
            .unwrap_or(false);
        if fails {
            return Err(anyhow!("stub model '{}' is configured to fail", model));
        }
        Ok(Box::new(
            StubBackend::new(model).with_latency(self.infer_latency),
        ))
    }
}
