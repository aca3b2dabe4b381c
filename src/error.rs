//! Error taxonomy for the detection pipeline.
//!
//! Most internal plumbing returns `anyhow::Result`; the variants here are the
//! failures callers are expected to branch on.

use std::time::Duration;

use thiserror::Error;

pub type DetectResult<T> = Result<T, DetectError>;

#[derive(Debug, Error)]
pub enum DetectError {
    /// A single model identifier failed to initialize.
    #[error("failed to load model {model}: {reason}")]
    LoadFailure { model: String, reason: String },

    /// Every fallback model failed on every retry pass.
    #[error("all models failed after {passes} passes: {last_error}")]
    ModelsExhausted { passes: u32, last_error: String },

    /// A loaded backend returned an error for one call.
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("backend inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("invalid configuration: {0}")]
    ConfigInvariantViolation(String),
}

impl DetectError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvariantViolation(msg.into())
    }

    pub fn load(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::LoadFailure {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

/// Reasons a frame could not be sampled from a source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("source has no decodable frame yet")]
    NotReady,

    #[error("captured {actual} bytes, expected {expected} for {width}x{height} RGB")]
    SizeMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
}

/// Decide whether an inference error points at a broken backend rather than a bad frame.
///
/// Timeouts always count as backend faults. Frame errors never do. Anything else is
/// judged by whether its error chain mentions the model or the backend.
pub fn is_backend_fault(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if cause.downcast_ref::<FrameError>().is_some() {
            return false;
        }
        if let Some(DetectError::InferenceTimeout(_)) = cause.downcast_ref::<DetectError>() {
            return true;
        }
    }
    err.chain().any(|cause| {
        let msg = cause.to_string().to_lowercase();
        msg.contains("model") || msg.contains("backend")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn timeouts_are_backend_faults() {
        let err = anyhow::Error::new(DetectError::InferenceTimeout(Duration::from_secs(10)));
        assert!(is_backend_fault(&err));
    }

    #[test]
    fn frame_errors_are_transient_even_with_context() {
        let err = anyhow::Error::new(FrameError::NotReady).context("model input rejected");
        assert!(!is_backend_fault(&err));
    }

    #[test]
    fn message_heuristic_matches_model_and_backend() {
        assert!(is_backend_fault(&anyhow!("Model session was disposed")));
        assert!(is_backend_fault(
            &anyhow!("out of memory").context("backend crashed")
        ));
        assert!(!is_backend_fault(&anyhow!("decoder hiccup")));
    }
}
