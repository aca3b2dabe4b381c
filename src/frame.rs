//! Frame sampling layer.
//!
//! - `FrameSource`: a live video source owned by the caller (camera, stream, synthetic).
//! - `Frame`: a still RGB snapshot at the source's native resolution.
//! - `FrameSampler`: readiness checks plus snapshot capture for one detection cycle.
//!
//! Frames are produced once per cycle and dropped when the cycle ends. Nothing in this
//! module keeps pixels around between cycles.

use anyhow::{Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FrameError;

/// Bytes per pixel for RGB8 snapshots.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// FrameSource: caller-owned live video
// ----------------------------------------------------------------------------

/// Decode progress reported by a live source, lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// A live video source the pipeline can sample from.
///
/// Sources are shared with in-flight cycles, so capture takes `&self`; sources that
/// keep decoder state use interior mutability.
pub trait FrameSource: Send + Sync {
    /// Current decoded frame size. `(0, 0)` until metadata is known.
    fn natural_size(&self) -> (u32, u32);

    fn ready_state(&self) -> ReadyState;

    /// Playback state, surfaced to renderers. Paused sources can still be sampled.
    fn is_playing(&self) -> bool {
        true
    }

    /// Copy out the current frame as tightly packed RGB8 at `natural_size()`.
    fn capture(&self) -> Result<Vec<u8>>;
}

// ----------------------------------------------------------------------------
// Frame: one snapshot
// ----------------------------------------------------------------------------

/// RGB8 snapshot handed to an inference backend for a single call.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in epoch milliseconds.
    pub captured_at_ms: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at_ms: u64) -> Result<Self> {
        let expected = expected_len(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: data.len(),
                width,
                height,
            }
            .into());
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at_ms,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

fn expected_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_CHANNELS
}

// ----------------------------------------------------------------------------
// FrameSampler
// ----------------------------------------------------------------------------

/// Produces inference snapshots from a live source.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSampler;

impl FrameSampler {
    pub fn new() -> Self {
        Self
    }

    /// A source is ready once it has nonzero dimensions and at least the current frame decoded.
    pub fn is_ready(&self, source: &dyn FrameSource) -> bool {
        let (width, height) = source.natural_size();
        width > 0 && height > 0 && source.ready_state() >= ReadyState::HaveCurrentData
    }

    /// Snapshot the source at its native resolution.
    ///
    /// Fails with [`FrameError::NotReady`] when the source has nothing to decode yet.
    pub fn sample(&self, source: &dyn FrameSource) -> Result<Frame> {
        if !self.is_ready(source) {
            return Err(FrameError::NotReady.into());
        }
        let (width, height) = source.natural_size();
        let captured_at_ms = now_epoch_ms();
        let data = source.capture().context("frame capture failed")?;
        Frame::new(data, width, height, captured_at_ms)
    }
}

/// Wall-clock time in epoch milliseconds. Falls back to 0 if the clock is before 1970.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
