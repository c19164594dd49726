use async_trait::async_trait;
use image::RgbImage;

use crate::domain::{
    camera::CameraInfo,
    detection::Detection,
    errors::DomainResult,
    model::{ModelId, YoloParams},
};

#[async_trait]
pub trait CameraCatalogPort: Send + Sync {
    async fn list_cameras(&self) -> DomainResult<Vec<CameraInfo>>;
}

#[async_trait]
pub trait ModelCatalogPort: Send + Sync {
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()>;
}

/// Loaded inference model. Returns candidates scored at or above
/// `params.conf_threshold`, boxes in the coordinates of `rgb`.
pub trait InferenceEngine: Send {
    fn infer(&mut self, rgb: &RgbImage, params: &YoloParams) -> DomainResult<Vec<Detection>>;
}

/// An open capture device. Dropping it releases the hardware.
pub trait CaptureDevice: Send {
    /// Next raw frame; `Ok(None)` once the device reports end of stream.
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>>;
}

pub trait DeviceOpener: Send + Sync {
    fn open(&self, device_index: u32) -> DomainResult<Box<dyn CaptureDevice>>;
}
