use async_trait::async_trait;
use v4l::video::Capture;
use v4l::Device;

use crate::application::ports::CameraCatalogPort;
use crate::domain::camera::*;
use crate::domain::errors::{DomainError, DomainResult};

/// Video capture nodes visible under `/dev`.
#[derive(Debug, Default)]
pub struct V4l2CameraCatalog;

impl V4l2CameraCatalog { pub fn new() -> Self { Self } }

#[async_trait]
impl CameraCatalogPort for V4l2CameraCatalog {
    async fn list_cameras(&self) -> DomainResult<Vec<CameraInfo>> {
        tokio::task::spawn_blocking(enumerate)
            .await
            .map_err(|e| DomainError::Device(format!("camera enumeration failed: {e}")))
    }
}

fn enumerate() -> Vec<CameraInfo> {
    let mut out = Vec::new();
    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let Ok(dev) = Device::with_path(&path) else { continue };
        let Ok(caps) = dev.query_caps() else { continue };
        // Metadata nodes share the driver but cannot stream images.
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        out.push(CameraInfo {
            id: CameraId { path },
            name: node.name().unwrap_or_else(|| "Unknown".to_string()),
            driver: caps.driver,
            card: caps.card,
            bus: caps.bus,
        });
    }
    out.sort_by_key(|c| c.id.index().unwrap_or(u32::MAX));
    out
}
