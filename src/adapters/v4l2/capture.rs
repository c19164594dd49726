use anyhow::{anyhow, bail, Result};
use image::{ImageFormat, RgbImage};
use tracing::{debug, info};
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::application::ports::{CaptureDevice, DeviceOpener};
use crate::domain::camera::CameraId;
use crate::domain::errors::{DomainError, DomainResult};

/// Configuración para inicializar la captura de vídeo.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Abre `/dev/video{N}` bajo demanda para el pipeline de streaming.
#[derive(Debug, Clone)]
pub struct V4l2Opener {
    config: CaptureConfig,
}

impl V4l2Opener {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl DeviceOpener for V4l2Opener {
    fn open(&self, device_index: u32) -> DomainResult<Box<dyn CaptureDevice>> {
        let camera = CameraId::from_index(device_index);
        let capture = V4l2Capture::open(&camera.path, &self.config)
            .map_err(|e| DomainError::Device(format!("{}: {e:#}", camera.path)))?;
        Ok(Box::new(capture))
    }
}

/// Adaptador para la captura física de frames usando V4L2.
/// El dispositivo se cierra al hacer drop.
pub struct V4l2Capture {
    // Va antes que el dispositivo: los buffers se liberan antes de cerrar el handle.
    stream: Stream<'static>,
    _device: Device,
    path: String,
    fourcc: FourCC,
    width: u32,
    height: u32,
}

impl V4l2Capture {
    /// Abre la cámara y configura formato, FPS y el flujo de memoria mapeada (MMAP).
    pub fn open(path: &str, cfg: &CaptureConfig) -> Result<Self> {
        let device = Device::with_path(path)?;

        // 1. Configurar Formato
        let mut fmt = device.format()?;
        let b = cfg.fourcc.as_bytes();
        if b.len() != 4 {
            bail!("FourCC must be 4 characters, got {:?}", cfg.fourcc);
        }
        fmt.fourcc = FourCC::new(&[b[0], b[1], b[2], b[3]]);
        fmt.width = cfg.width;
        fmt.height = cfg.height;

        // El driver puede ajustar los valores a los más cercanos soportados
        let actual_fmt = device.set_format(&fmt)?;

        // 2. Configurar FPS (Frame Interval)
        let mut params = device.params()?;
        params.interval.numerator = 1;
        params.interval.denominator = cfg.fps;
        let _ = device.set_params(&params);

        // 3. Inicializar Stream (MMAP)
        let stream = Stream::with_buffers(&device, v4l::buffer::Type::VideoCapture, 4)?;

        info!(
            path,
            width = actual_fmt.width,
            height = actual_fmt.height,
            fourcc = %actual_fmt.fourcc,
            fps = cfg.fps,
            "camera opened"
        );

        Ok(Self {
            stream,
            _device: device,
            path: path.to_string(),
            fourcc: actual_fmt.fourcc,
            width: actual_fmt.width,
            height: actual_fmt.height,
        })
    }

    fn next_rgb(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(data.len());
        let data = if used > 0 { &data[..used] } else { data };
        let fcc_str = self.fourcc.str().map_err(|_| anyhow!("invalid FourCC"))?;

        match fcc_str {
            // MJPG es básicamente una secuencia de JPEGs
            "MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8()),
            "YUYV" => yuyv_to_rgb(data, self.width, self.height),
            _ => Err(anyhow!("camera format {fcc_str} is not supported")),
        }
    }
}

impl CaptureDevice for V4l2Capture {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>> {
        self.next_rgb()
            .map(Some)
            .map_err(|e| DomainError::Device(format!("{}: {e:#}", self.path)))
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        debug!(path = %self.path, "closing camera");
    }
}

/// Convierte un buffer YUYV (YUV 4:2:2, BT.601) a RgbImage.
fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> Result<RgbImage> {
    let expected = (w as usize) * (h as usize) * 2;
    if yuyv.len() < expected {
        bail!("short YUYV frame: {} bytes, expected {expected}", yuyv.len());
    }
    let mut out = RgbImage::new(w, h);

    // Cada bloque de 4 bytes [Y0, U, Y1, V] define 2 píxeles que comparten U y V.
    for (i, chunk) in yuyv[..expected].chunks_exact(4).enumerate() {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        let pixel_idx = i as u32 * 2;
        let x = pixel_idx % w;
        let y = pixel_idx / w;

        for (dx, luma) in [chunk[0], chunk[2]].into_iter().enumerate() {
            let x = x + dx as u32;
            if x >= w || y >= h {
                continue;
            }
            let luma = luma as f32;
            let r = (luma + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (luma - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
            let b = (luma + 1.772 * u).clamp(0.0, 255.0) as u8;
            out.put_pixel(x, y, image::Rgb([r, g, b]));
        }
    }
    Ok(out)
}
