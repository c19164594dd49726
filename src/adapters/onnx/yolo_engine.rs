use anyhow::{anyhow, bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array4, ArrayView2, ArrayViewD, Axis, IxDyn};
use ort::session::Session;
use ort::value::Value;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::application::ports::InferenceEngine;
use crate::domain::detection::Detection;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::YoloParams;

/// YOLOv8/v11 ONNX export (boxes as cx, cy, w, h followed by per-class scores).
pub struct OnnxYoloEngine {
    session: Session,
    labels: Vec<String>,
}

impl OnnxYoloEngine {
    pub fn load(path: &Path, labels: Vec<String>) -> DomainResult<Self> {
        Self::try_load(path, labels)
            .map_err(|e| DomainError::ModelLoad(format!("{}: {e:#}", path.display())))
    }

    fn try_load(path: &Path, labels: Vec<String>) -> Result<Self> {
        let model_bytes = fs::read(path).context("reading model file")?;
        if model_bytes.is_empty() {
            bail!("model file is empty");
        }

        #[allow(unused_mut)]
        let mut builder = Session::builder()?.with_intra_threads(4)?;

        // CUDA es opcional: si está compilado se registra, si no continuamos en CPU.
        #[cfg(feature = "cuda")]
        {
            let cuda = ort::execution_providers::CUDAExecutionProvider::default().build();
            if let Ok(builder_with_cuda) = builder.clone().with_execution_providers([cuda]) {
                builder = builder_with_cuda;
            }
        }

        // Con `ort` sin default-features, usamos commit_from_memory.
        let session = builder.commit_from_memory(&model_bytes)?;
        info!(model = %path.display(), classes = labels.len(), "ONNX model loaded");
        Ok(Self { session, labels })
    }

    fn run(&mut self, rgb: &RgbImage, params: &YoloParams) -> Result<Vec<Detection>> {
        let imgsz = params.input_size as usize;
        let resized = image::imageops::resize(rgb, imgsz as u32, imgsz as u32, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        let input_shape = vec![1, 3, imgsz as i64, imgsz as i64];
        let input_tensor = Value::from_array((input_shape, input.into_raw_vec()))?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (shape_out, data_out) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape_out.iter().map(|&x| x as usize).collect();
        if dims.len() != 3 || dims[0] != 1 {
            bail!("unexpected detector output shape {dims:?}");
        }
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data_out)?;
        let view = array_view.index_axis(Axis(0), 0);
        let view = view
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| anyhow!("output is not two-dimensional: {e}"))?;
        // Normalmente [4 + clases, candidatos]; algunos exports vienen transpuestos.
        let view: ArrayView2<f32> = if view.shape()[0] > view.shape()[1] { view.reversed_axes() } else { view };
        if view.shape()[0] < 5 {
            bail!("output needs at least 5 rows (box + one class), got {}", view.shape()[0]);
        }

        let sx = rgb.width() as f32 / imgsz as f32;
        let sy = rgb.height() as f32 / imgsz as f32;
        let mut candidates = Vec::new();

        for i in 0..view.shape()[1] {
            let column = view.column(i);
            let Some((class_id, max_score)) = column
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
            else {
                continue;
            };

            if max_score >= params.conf_threshold {
                candidates.push(Detection {
                    cx: column[0] * sx,
                    cy: column[1] * sy,
                    w: column[2] * sx,
                    h: column[3] * sy,
                    score: max_score,
                    class_id,
                    label: label_for(&self.labels, class_id),
                });
            }
        }

        let mut kept = non_max_suppression(candidates, params.iou_threshold);
        kept.truncate(params.max_detections);
        Ok(kept)
    }
}

impl InferenceEngine for OnnxYoloEngine {
    fn infer(&mut self, rgb: &RgbImage, params: &YoloParams) -> DomainResult<Vec<Detection>> {
        self.run(rgb, params)
            .map_err(|e| DomainError::Inference(format!("{e:#}")))
    }
}

fn label_for(labels: &[String], class_id: usize) -> String {
    labels
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class {class_id}"))
}

/// Greedy per-class NMS; result is sorted by descending score.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for det in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}
