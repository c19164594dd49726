use serde::{Deserialize, Serialize};

use super::detection::Detection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub infer_ms: f32,
    pub fps_est: f32,
    pub sequence: Option<u64>,
    pub artifact: Option<String>,
    pub detections: Vec<Detection>,
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    Cancelled,
    DeviceFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Frame { meta: FrameMeta },
    Error { kind: String, message: String },
    Closed { reason: StopReason, processed: u64, skipped: u64 },
}

/// One broadcast unit: a JSON message, optionally followed by the JPEG it describes.
#[derive(Debug, Clone)]
pub struct StreamPacket {
    pub message: StreamMessage,
    pub jpeg: Option<Vec<u8>>,
}
