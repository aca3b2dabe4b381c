//! Per-cycle processing and the scheduler that drives it.
//!
//! Stages are plain functions or small owned structs so they can be tested without a
//! runtime; [`DetectionPipeline`] wires them together behind a timer.

pub mod alert;
pub mod classify;
pub mod invoker;
pub mod overlay;
pub mod rank;
pub mod stats;

pub use alert::{AlertEvaluator, AlertEvent};
pub use classify::{classify, classify_all};
pub use invoker::{CycleCounters, DetectionPipeline};
pub use overlay::{label_anchor, overlay_color, to_pixel_rect, OverlaySummary, PixelRect};
pub use rank::rank;
pub use stats::{DetectionStats, StatsAggregator};
