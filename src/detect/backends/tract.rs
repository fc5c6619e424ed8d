#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{Detection, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::Frame;

/// COCO class index for "person".
const PERSON_CLASS: usize = 0;

/// Tract-based YOLO person detector for ONNX models.
///
/// Loads a local model file and runs it on RGB frames. Expects the common
/// YOLOv5-style output layout `[1, N, 5 + classes]` where each row is
/// `cx, cy, w, h, objectness, class scores...` in input-pixel units.
/// Only person detections above the confidence threshold are returned.
pub struct YoloPersonDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl YoloPersonDetector {
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

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let width = frame.width as usize;
        let pixels = &frame.pixels;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_people(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if rows.ndim() != 3 || rows.shape()[2] < 6 {
            return Err(anyhow!(
                "unexpected model output shape {:?}, wanted [1, N, 5 + classes]",
                rows.shape()
            ));
        }
        let rows = rows
            .index_axis_move(tract_ndarray::Axis(0), 0)
            .into_dimensionality::<tract_ndarray::Ix2>()
            .context("model output rows were not 2-D")?;

        Ok(decode_rows(
            rows,
            self.width,
            self.height,
            self.confidence_threshold,
        ))
    }
}

/// Decode YOLO output rows into person detections.
///
/// The view may be strided (the graph is free to hand back a non-contiguous
/// tensor), so elements are read through the view rather than a flat slice.
fn decode_rows(
    rows: tract_ndarray::ArrayView2<f32>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
) -> Vec<Detection> {
    let mut people = Vec::new();
    for row in rows.rows() {
        let objectness = row[4];
        if objectness < confidence_threshold {
            continue;
        }

        let (best_class, best_score) = row
            .iter()
            .skip(5)
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (idx, &score)| {
                if score > acc.1 {
                    (idx, score)
                } else {
                    acc
                }
            });
        if best_class != PERSON_CLASS {
            continue;
        }

        let confidence = objectness * best_score;
        if confidence < confidence_threshold {
            continue;
        }

        // Center-format box in input pixels, normalized to 0..1 top-left.
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        people.push(Detection {
            x: (cx - w / 2.0) / width as f32,
            y: (cy - h / 2.0) / height as f32,
            w: w / width as f32,
            h: h / height as f32,
            confidence,
        });
    }
    people
}

impl Detector for YoloPersonDetector {
    fn name(&self) -> &'static str {
        "tract-yolo"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_people(outputs)
    }
}
