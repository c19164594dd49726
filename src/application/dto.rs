use serde::{Deserialize, Serialize};

use crate::application::controller::StillReport;
use crate::domain::{artifact::ArtifactKind, camera::CameraInfo, detection::Detection};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectRequest {
    pub conf: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartStreamRequest {
    pub device_index: Option<u32>,
    pub conf: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactQuery {
    #[serde(default = "default_kind")]
    pub kind: ArtifactKind,
}

fn default_kind() -> ArtifactKind {
    ArtifactKind::StillImage
}

/// One row of the "Detection Results" panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionDto {
    pub xywh: [f32; 4],
    pub score: f32,
    pub class_id: usize,
    pub label: String,
}

impl From<&Detection> for DetectionDto {
    fn from(d: &Detection) -> Self {
        Self { xywh: d.xywh(), score: d.score, class_id: d.class_id, label: d.label.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub detections: Vec<DetectionDto>,
    pub summary: String,
    pub width: u32,
    pub height: u32,
    pub artifact: Option<String>,
    pub latest: Option<String>,
    pub warning: Option<String>,
}

impl From<StillReport> for DetectResponse {
    fn from(report: StillReport) -> Self {
        Self {
            detections: report.result.detections.iter().map(DetectionDto::from).collect(),
            summary: report.summary,
            width: report.result.annotated.width(),
            height: report.result.annotated.height(),
            artifact: report.artifact.map(|a| a.file_name()),
            latest: report.latest.map(|a| a.file_name()),
            warning: report.persist_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedResponse {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamerasResponse {
    pub cameras: Vec<CameraInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
