//! Synthetic frame source (`stub://`).
//!
//! Generates procedural RGB frames at a fixed size. The source reports
//! `HaveMetadata` for a configurable number of readiness polls before it claims a
//! decodable frame, which mimics a camera that is still warming up.

use anyhow::{anyhow, Result};
use std::sync::Mutex;

use crate::frame::{FrameSource, ReadyState, RGB_CHANNELS};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URL; must use the `stub://` scheme.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Readiness polls answered with `HaveMetadata` before frames become available.
    pub warmup_polls: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 640,
            height: 480,
            warmup_polls: 0,
        }
    }
}

/// Statistics for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticStats {
    pub frames_captured: u64,
    pub url: String,
}

struct SyntheticState {
    width: u32,
    height: u32,
    warmup_remaining: u32,
    frame_count: u64,
    scene_state: u8,
    playing: bool,
}

/// Procedural frame source for demos and tests.
pub struct SyntheticSource {
    url: String,
    state: Mutex<SyntheticState>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            return Err(anyhow!(
                "synthetic source only supports stub:// urls, got {}",
                config.url
            ));
        }
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            config.url,
            config.width,
            config.height
        );
        Ok(Self {
            url: config.url,
            state: Mutex::new(SyntheticState {
                width: config.width,
                height: config.height,
                warmup_remaining: config.warmup_polls,
                frame_count: 0,
                scene_state: 0,
                playing: true,
            }),
        })
    }

    /// Change the decoded size, as a camera does on a resolution switch.
    pub fn set_size(&self, width: u32, height: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.width = width;
            state.height = height;
        }
    }

    pub fn set_playing(&self, playing: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.playing = playing;
        }
    }

    pub fn stats(&self) -> SyntheticStats {
        let frames_captured = self.state.lock().map(|s| s.frame_count).unwrap_or(0);
        SyntheticStats {
            frames_captured,
            url: self.url.clone(),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn natural_size(&self) -> (u32, u32) {
        self.state
            .lock()
            .map(|s| (s.width, s.height))
            .unwrap_or((0, 0))
    }

    fn ready_state(&self) -> ReadyState {
        let Ok(mut state) = self.state.lock() else {
            return ReadyState::HaveNothing;
        };
        if state.width == 0 || state.height == 0 {
            return ReadyState::HaveNothing;
        }
        if state.warmup_remaining > 0 {
            state.warmup_remaining -= 1;
            return ReadyState::HaveMetadata;
        }
        ReadyState::HaveEnoughData
    }

    fn is_playing(&self) -> bool {
        self.state.lock().map(|s| s.playing).unwrap_or(false)
    }

    fn capture(&self) -> Result<Vec<u8>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("synthetic source lock poisoned"))?;
        state.frame_count += 1;
        if state.frame_count % 50 == 0 {
            state.scene_state = state.scene_state.wrapping_add(1);
        }

        let pixel_count = state.width as usize * state.height as usize * RGB_CHANNELS;
        let offset = state.frame_count + state.scene_state as u64;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + offset) % 256) as u8;
        }
        Ok(pixels)
    }
}
