//! Live frame sources.
//!
//! The pipeline samples whatever implements `FrameSource`; camera and stream
//! adapters live with the caller. This module ships the synthetic `stub://` source
//! used by the daemon and by tests.
//!
//! Sources MUST NOT:
//! - Store captured frames to disk
//! - Retain frames after handing them to the sampler

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticSource};
