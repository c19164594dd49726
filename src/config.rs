//! Runtime configuration: TOML file with defaults for every key.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::v4l2::capture::CaptureConfig;
use crate::domain::{
    artifact::LatestScope,
    errors::DomainResult,
    model::{ConfidenceThreshold, ModelId, YoloParams},
};

/// Largest accepted stream width (8K UHD).
const MAX_STREAM_WIDTH: u32 = 7680;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceMode {
    #[default]
    Image,
    Webcam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Source preselected on the page.
    pub source_mode: SourceMode,
    pub confidence_threshold: f32,
    pub model_path: PathBuf,
    pub default_image_asset: PathBuf,
    /// Pre-rendered result shown next to the default image before any detection.
    pub default_detected_asset: PathBuf,
    pub webcam_device_index: u32,
    /// Pixel format and size requested from the webcam; the driver may adjust them.
    pub webcam_fourcc: String,
    pub webcam_width: u32,
    pub webcam_height: u32,
    pub webcam_fps: u32,
    /// Largest accepted upload body, in bytes.
    pub max_upload_bytes: usize,
    pub output_dir: PathBuf,
    pub latest_scope: LatestScope,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub max_detections: usize,
    pub labels: Vec<String>,
    pub stream_width: u32,
    pub inference_deadline_ms: Option<u64>,
    pub bind_addr: String,
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_mode: SourceMode::Image,
            confidence_threshold: 0.40,
            model_path: PathBuf::from("weights/best.onnx"),
            default_image_asset: PathBuf::from("images/1.jpg"),
            default_detected_asset: PathBuf::from("images/1_detected.jpeg"),
            webcam_device_index: 0,
            webcam_fourcc: "MJPG".to_string(),
            webcam_width: 1280,
            webcam_height: 720,
            webcam_fps: 30,
            max_upload_bytes: 200 * 1024 * 1024,
            output_dir: PathBuf::from("results"),
            latest_scope: LatestScope::Directory,
            iou_threshold: 0.45,
            input_size: 640,
            max_detections: 100,
            labels: COCO_LABELS.iter().map(|s| s.to_string()).collect(),
            stream_width: 720,
            inference_deadline_ms: None,
            bind_addr: "0.0.0.0:8090".to_string(),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl AppConfig {
    /// Reads `path` if given, otherwise starts from defaults. Validates either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!("confidence_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            bail!("iou_threshold must be within [0, 1]");
        }
        if self.input_size == 0 || self.input_size % 32 != 0 {
            bail!("input_size must be a positive multiple of 32, got {}", self.input_size);
        }
        if !(16..=MAX_STREAM_WIDTH).contains(&self.stream_width) {
            bail!("stream_width must be within [16, {MAX_STREAM_WIDTH}], got {}", self.stream_width);
        }
        if self.webcam_fourcc.len() != 4 {
            bail!("webcam_fourcc must be 4 characters, got {:?}", self.webcam_fourcc);
        }
        if self.webcam_fps == 0 {
            bail!("webcam_fps must be at least 1");
        }
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be positive");
        }
        if self.max_detections == 0 {
            bail!("max_detections must be at least 1");
        }
        Ok(())
    }

    pub fn threshold(&self) -> DomainResult<ConfidenceThreshold> {
        ConfidenceThreshold::new(self.confidence_threshold)
    }

    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            input_size: self.input_size,
            conf_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }

    pub fn model_id(&self) -> ModelId {
        let name = self
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".into());
        ModelId { name, onnx_path: self.model_path.to_string_lossy().into_owned() }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            fourcc: self.webcam_fourcc.clone(),
            width: self.webcam_width,
            height: self.webcam_height,
            fps: self.webcam_fps,
        }
    }

    pub fn inference_deadline(&self) -> Option<Duration> {
        self.inference_deadline_ms.map(Duration::from_millis)
    }
}
