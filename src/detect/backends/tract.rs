#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, ModelProvider};
use crate::detect::result::{BoundingBox, RawDetection, BOX_SPACE};
use crate::frame::{Frame, RGB_CHANNELS};

type Plan = TypedRunnableModel<TypedModel>;

/// Values per output row: xmin, ymin, xmax, ymax, score, class (box in 0..1).
const ROW_LEN: usize = 6;

/// Tract-based backend for ONNX detectors.
///
/// Loads a local model file plus a `.labels` sidecar (one class name per line).
/// Frames are nearest-neighbour resized to the model input. No network I/O.
pub struct TractBackend {
    name: String,
    model: Arc<Plan>,
    labels: Arc<Vec<String>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels_path = model_path.with_extension("labels");
        let labels = std::fs::read_to_string(&labels_path)
            .with_context(|| format!("failed to read model labels {}", labels_path.display()))?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        Ok(Self {
            name: format!("tract:{}", model_path.display()),
            model: Arc::new(model),
            labels: Arc::new(labels),
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot build model input from an empty frame"));
        }
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sx = x * src_w / dst_w;
            let sy = y * src_h / dst_h;
            let idx = (sy * src_w + sx) * RGB_CHANNELS + c;
            pixels[idx] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

fn decode_rows(outputs: &TVec<TValue>, labels: &[String]) -> Result<Vec<RawDetection>> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let flat: Vec<f32> = view.iter().copied().collect();
    if flat.len() % ROW_LEN != 0 {
        return Err(anyhow!(
            "model output length {} is not a multiple of {}",
            flat.len(),
            ROW_LEN
        ));
    }
    Ok(flat
        .chunks_exact(ROW_LEN)
        .map(|row| {
            let class = row[5].max(0.0) as usize;
            let label = labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class));
            RawDetection::new(
                label,
                row[4],
                BoundingBox::new(
                    row[0] * BOX_SPACE,
                    row[1] * BOX_SPACE,
                    row[2] * BOX_SPACE,
                    row[3] * BOX_SPACE,
                ),
            )
        })
        .collect())
}

#[async_trait]
impl InferenceBackend for TractBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let model = Arc::clone(&self.model);
        let labels = Arc::clone(&self.labels);
        tokio::task::spawn_blocking(move || {
            let outputs = model
                .run(tvec!(input.into()))
                .context("ONNX model inference failed")?;
            decode_rows(&outputs, &labels)
        })
        .await
        .context("tract backend worker panicked")?
    }
}

/// Loads `TractBackend`s from local ONNX paths (`tract:/path/to/model.onnx`).
pub struct TractProvider {
    model_dir: Option<PathBuf>,
    input_width: u32,
    input_height: u32,
}

impl TractProvider {
    pub fn new(input_width: u32, input_height: u32) -> Self {
        Self {
            model_dir: None,
            input_width,
            input_height,
        }
    }

    /// Resolve relative model names against this directory.
    pub fn with_model_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.model_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ModelProvider for TractProvider {
    fn name(&self) -> &str {
        "tract"
    }

    async fn load(&self, model: &str) -> Result<Box<dyn InferenceBackend>> {
        if model.contains("://") {
            return Err(anyhow!("tract provider only loads local model files"));
        }
        let path = match &self.model_dir {
            Some(dir) if Path::new(model).is_relative() => dir.join(model),
            _ => PathBuf::from(model),
        };
        let (w, h) = (self.input_width, self.input_height);
        let backend = tokio::task::spawn_blocking(move || TractBackend::new(path, w, h))
            .await
            .context("tract model loader panicked")??;
        Ok(Box::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_model_file_is_a_load_error() {
        let provider = TractProvider::new(64, 64).with_model_dir("/nonexistent");
        let err = provider.load("detector.onnx").await.err().expect("load must fail");
        assert!(err.to_string().contains("model"));
    }

    #[tokio::test]
    async fn remote_models_are_rejected() {
        let provider = TractProvider::new(64, 64);
        assert!(provider.load("https://example.com/m.onnx").await.is_err());
    }
}
