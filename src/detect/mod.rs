//! Inference backends and their lifecycle.
//!
//! - `InferenceBackend`: one loaded model, callable once per cycle.
//! - `ModelProvider`: turns a model identifier into a backend.
//! - `ProviderRegistry`: routes `scheme:model` identifiers to providers.
//! - `ModelLoader`: fallback list, retry passes, invalidation.

mod backend;
pub mod backends;
mod loader;
mod registry;
mod result;

pub use backend::{InferenceBackend, ModelProvider};
pub use backends::{StubBackend, StubProvider};
pub use loader::{BackendState, BackendStatus, ModelLoader};
pub use registry::ProviderRegistry;
pub use result::{BoundingBox, Detection, Priority, RawDetection, BOX_SPACE};

#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractProvider};
