use anyhow::Result;
use async_trait::async_trait;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// A loaded, ready-to-call inference engine.
///
/// Backends are stateless with respect to frames: each call gets one snapshot and
/// must not hold on to it after returning. The pipeline never issues more than one
/// call at a time against a given backend.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Run detection on a frame. Boxes are reported in the 0..=1000 normalized space.
    async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once after loading.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Loads backends for model identifiers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier, also used as its scheme in the registry.
    fn name(&self) -> &str;

    /// Acquire a backend for `model`. The identifier is passed without its scheme prefix.
    async fn load(&self, model: &str) -> Result<Box<dyn InferenceBackend>>;
}
