#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetections;

/// Tract-based backend for SSD-style ONNX exports.
///
/// The model takes a `uint8` NHWC tensor of shape `[1, height, width, 3]` and
/// produces, in order: boxes `[1, N, 4]`, classes `[1, N]`, scores `[1, N]`
/// and `num_detections` `[1]`.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
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
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "model loaded from {}. input shape: {}x{}",
            model_path.display(),
            width,
            height
        );

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }
        let input = tract_ndarray::Array4::from_shape_vec(
            (1, height as usize, width as usize, 3),
            pixels.to_vec(),
        )
        .context("pixel buffer does not match model input")?;
        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<RawDetections> {
        if outputs.len() < 4 {
            return Err(anyhow!(
                "expected 4 model outputs (boxes, classes, scores, count), got {}",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes output was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output was not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("num_detections output was not f32")?;

        let coords: Vec<f32> = boxes.iter().copied().collect();
        if coords.len() % 4 != 0 {
            return Err(anyhow!("boxes output has {} values", coords.len()));
        }
        let num_detections = count
            .iter()
            .next()
            .copied()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as usize)
            .unwrap_or(0);

        Ok(RawDetections {
            boxes: coords
                .chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]])
                .collect(),
            classes: classes.iter().copied().collect(),
            scores: scores.iter().copied().collect(),
            num_detections,
        })
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0u8; (self.width * self.height * 3) as usize];
        self.detect(&blank, self.width, self.height).map(|_| ())
    }
}
