//! Hazard Watch
//!
//! Real-time safety detection for live camera feeds.
//!
//! # Architecture
//!
//! A detection cycle runs on a fixed interval against one live source:
//!
//! 1. **Sample**: snapshot the current frame once the source has decoded data.
//! 2. **Infer**: hand the frame to the loaded backend, bounded by a timeout.
//! 3. **Classify**: keep detections above `threshold` and assign a safety priority.
//! 4. **Rank**: HIGH before MEDIUM before LOW, higher score first within a tier.
//! 5. **Aggregate**: fold the batch into running statistics.
//! 6. **Alert**: raise an event for every HIGH detection when alerts are enabled.
//! 7. **Publish**: replace the current batch seen by renderers.
//!
//! At most one cycle is in flight. Backends come from a fallback list of model
//! identifiers; the loader retries whole passes with linear backoff and parks in a
//! terminal error state until an explicit retry.
//!
//! # Module Structure
//!
//! - `config`: run parameters, partial updates, daemon file + env loading
//! - `detect`: backends, provider registry, model loader, detection types
//! - `frame`: live source trait, snapshots, sampler
//! - `ingest`: synthetic `stub://` source
//! - `pipeline`: classification, ranking, stats, alerts, overlay mapping, scheduler

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;

pub use config::{ConfigUpdate, DaemonConfig, ObjectDetectionConfig};
pub use detect::{
    BackendState, BackendStatus, BoundingBox, Detection, InferenceBackend, ModelLoader,
    ModelProvider, Priority, ProviderRegistry, RawDetection,
};
pub use error::{DetectError, DetectResult, FrameError};
pub use frame::{Frame, FrameSampler, FrameSource, ReadyState};
pub use pipeline::{
    AlertEvent, CycleCounters, DetectionPipeline, DetectionStats, OverlaySummary, PixelRect,
};
