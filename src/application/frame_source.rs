use image::{imageops::FilterType, ImageFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::ports::{CaptureDevice, DeviceOpener};
use crate::domain::{
    errors::{DomainError, DomainResult},
    frame::Frame,
};

pub const STREAM_WIDTH: u32 = 720;

const SUPPORTED_FORMATS: [ImageFormat; 4] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Bmp, ImageFormat::WebP];

/// Where a still frame comes from.
#[derive(Debug, Clone)]
pub enum StillSource {
    Upload(Vec<u8>),
    DefaultAsset,
}

pub struct FrameSource {
    default_asset: PathBuf,
    stream_size: (u32, u32),
    opener: Arc<dyn DeviceOpener>,
}

impl FrameSource {
    pub fn new(default_asset: PathBuf, opener: Arc<dyn DeviceOpener>) -> Self {
        Self::with_stream_width(default_asset, opener, STREAM_WIDTH)
    }

    /// Streamed frames are resized to `width` x floor(width * 9 / 16).
    pub fn with_stream_width(default_asset: PathBuf, opener: Arc<dyn DeviceOpener>, width: u32) -> Self {
        Self {
            default_asset,
            stream_size: (width, (u64::from(width) * 9 / 16) as u32),
            opener,
        }
    }

    pub fn next_still_frame(&self, source: StillSource) -> DomainResult<Frame> {
        match source {
            StillSource::Upload(bytes) => decode_still(&bytes),
            StillSource::DefaultAsset => {
                let bytes = std::fs::read(&self.default_asset).map_err(|e| {
                    DomainError::NotFound(format!(
                        "default image {}: {e}",
                        self.default_asset.display()
                    ))
                })?;
                decode_still(&bytes)
            }
        }
    }

    pub fn stream_frames(&self, device_index: u32) -> DomainResult<FrameStream> {
        let device = self.opener.open(device_index)?;
        info!(device_index, "capture device opened");
        Ok(FrameStream {
            device: Some(device),
            device_index,
            size: self.stream_size,
        })
    }
}

pub fn decode_still(bytes: &[u8]) -> DomainResult<Frame> {
    let format = image::guess_format(bytes)
        .map_err(|_| DomainError::Decode("unrecognised image data".into()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(DomainError::Decode(format!(
            "{format:?} is not supported (use jpg, jpeg, png, bmp or webp)"
        )));
    }
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| DomainError::Decode(e.to_string()))?;
    Ok(Frame::new(image.to_rgb8()))
}

/// Frames from one open device. Ends for good once the device reports end of
/// stream; the device is released at that point or when the stream is dropped.
pub struct FrameStream {
    device: Option<Box<dyn CaptureDevice>>,
    device_index: u32,
    size: (u32, u32),
}

impl FrameStream {
    fn release(&mut self) {
        if self.device.take().is_some() {
            info!(device_index = self.device_index, "capture device released");
        }
    }
}

impl Iterator for FrameStream {
    type Item = DomainResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let device = self.device.as_mut()?;
        match device.next_frame() {
            Ok(Some(raw)) => {
                let (w, h) = self.size;
                let resized = if raw.dimensions() == (w, h) {
                    raw
                } else {
                    image::imageops::resize(&raw, w, h, FilterType::Triangle)
                };
                Some(Ok(Frame::new(resized)))
            }
            Ok(None) => {
                debug!(device_index = self.device_index, "device reported end of stream");
                self.release();
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl std::iter::FusedIterator for FrameStream {}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.release();
    }
}
