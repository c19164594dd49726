use image::RgbImage;

/// Decoded RGB raster, either from an upload or from a capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Frame with detection overlays burned in, always in RGB order.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
    image: RgbImage,
}

impl AnnotatedFrame {
    pub(crate) fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Anything the artifact store can write to disk.
pub trait Raster {
    fn rgb(&self) -> &RgbImage;
}

impl Raster for Frame {
    fn rgb(&self) -> &RgbImage {
        &self.image
    }
}

impl Raster for AnnotatedFrame {
    fn rgb(&self) -> &RgbImage {
        &self.image
    }
}

/// Swaps the first and third channel of every pixel in place.
pub(crate) fn reverse_channels(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}
