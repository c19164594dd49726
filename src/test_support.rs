//! In-memory stand-ins for the model and the capture hardware.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::ports::{CaptureDevice, DeviceOpener, InferenceEngine};
use crate::domain::{
    detection::Detection,
    errors::{DomainError, DomainResult},
    model::YoloParams,
};

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).expect("encode test image");
    out.into_inner()
}

/// Engine that returns a fixed candidate list, filtered like a real model would.
pub struct FakeEngine {
    candidates: Vec<Detection>,
    failure: Option<String>,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<f32>>>,
}

impl FakeEngine {
    pub fn returning(candidates: Vec<Detection>) -> Self {
        Self { candidates, failure: None, delay: None, seen: Arc::default() }
    }

    pub fn failing(message: &str) -> Self {
        Self { failure: Some(message.to_string()), ..Self::returning(vec![]) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen_thresholds(&self) -> Arc<Mutex<Vec<f32>>> {
        self.seen.clone()
    }
}

impl InferenceEngine for FakeEngine {
    fn infer(&mut self, _rgb: &RgbImage, params: &YoloParams) -> DomainResult<Vec<Detection>> {
        self.seen.lock().unwrap().push(params.conf_threshold);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.failure {
            return Err(DomainError::Inference(message.clone()));
        }
        Ok(self
            .candidates
            .iter()
            .filter(|d| d.score >= params.conf_threshold)
            .cloned()
            .collect())
    }
}

/// Exclusive fake camera. Each open yields `frames` small frames, then end of stream.
#[derive(Clone)]
pub struct FakeCamera {
    frames: usize,
    fail_after: Option<usize>,
    in_use: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

pub struct HeldCamera(Arc<AtomicBool>);

impl Drop for HeldCamera {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FakeCamera {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            fail_after: None,
            in_use: Arc::default(),
            opens: Arc::default(),
            releases: Arc::default(),
        }
    }

    /// Reads after the first `n` fail with a device error.
    pub fn failing_reads_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Marks the device as taken by someone else until the guard drops.
    pub fn hold(&self) -> HeldCamera {
        self.in_use.store(true, Ordering::SeqCst);
        HeldCamera(self.in_use.clone())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for FakeCamera {
    fn open(&self, device_index: u32) -> DomainResult<Box<dyn CaptureDevice>> {
        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(DomainError::Device(format!("/dev/video{device_index} is busy")));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle { camera: self.clone(), read: 0 }))
    }
}

struct FakeHandle {
    camera: FakeCamera,
    read: usize,
}

impl CaptureDevice for FakeHandle {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>> {
        if let Some(limit) = self.camera.fail_after {
            if self.read >= limit {
                return Err(DomainError::Device("VIDIOC_DQBUF: Input/output error".into()));
            }
        }
        if self.read >= self.camera.frames {
            return Ok(None);
        }
        self.read += 1;
        let shade = (self.read * 40 % 256) as u8;
        Ok(Some(RgbImage::from_pixel(64, 48, Rgb([shade, 0, 255 - shade]))))
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.camera.releases.fetch_add(1, Ordering::SeqCst);
        self.camera.in_use.store(false, Ordering::SeqCst);
    }
}
