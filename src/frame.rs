//! Caller-owned frames.
//!
//! - `Frame`: pixel buffer plus dimensions and layout, owned by the capture loop.
//! - The core borrows a `Frame` for one call and derives an analysis image from it.
//!   Nothing in the core keeps a reference to the caller's buffer.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::PreprocessError;
use crate::ingest::normalize::{normalize_to_luma, normalize_to_rgb};
pub use crate::ingest::normalize::PixelFormat;

/// A single still image captured from one source.
///
/// `Frame` validates that the buffer length matches the declared dimensions
/// and layout. Emptiness is a separate contract, checked when the frame is
/// handed to the preprocessing service.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PreprocessError> {
        let expected = format
            .expected_len(width, height)
            .map_err(|e| PreprocessError::InvalidFrame(e.to_string()))?;
        if data.len() != expected {
            return Err(PreprocessError::InvalidFrame(format!(
                "{:?} buffer for {}x{} must be {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn from_luma(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Gray8,
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb24,
        }
    }

    /// Wrap a decoded image. Luma images stay single-channel; everything else
    /// is converted to RGB.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(luma) => Self::from_luma(luma),
            other => Self::from_rgb(other.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Luma image the analysis stages run on, downscaled so its width does not
    /// exceed `max_width`.
    pub fn analysis_luma(&self, max_width: u32) -> anyhow::Result<GrayImage> {
        let luma = normalize_to_luma(&self.data, self.width, self.height, self.format)?;
        Ok(downscale_to_width(luma, max_width))
    }

    /// Full-resolution RGB copy.
    pub fn to_rgb(&self) -> anyhow::Result<RgbImage> {
        normalize_to_rgb(&self.data, self.width, self.height, self.format)
    }
}

pub(crate) fn downscale_to_width<P>(
    image: image::ImageBuffer<P, Vec<P::Subpixel>>,
    max_width: u32,
) -> image::ImageBuffer<P, Vec<P::Subpixel>>
where
    P: image::Pixel + 'static,
{
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return image;
    }
    let scale = max_width as f64 / width as f64;
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    imageops::resize(&image, max_width, new_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Frame::new(vec![0u8; 10], 4, 4, PixelFormat::Gray8).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn zero_sized_frame_constructs_but_is_empty() {
        let frame = Frame::new(Vec::new(), 0, 0, PixelFormat::Rgb24).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn analysis_luma_downscales_wide_frames() {
        let frame = Frame::from_luma(GrayImage::from_pixel(1280, 720, image::Luma([90])));
        let luma = frame.analysis_luma(640).unwrap();
        assert_eq!(luma.dimensions(), (640, 360));
        assert!(luma.pixels().all(|p| p[0] == 90));
    }

    #[test]
    fn narrow_frames_are_untouched() {
        let frame = Frame::from_rgb(RgbImage::from_pixel(32, 16, image::Rgb([10, 20, 30])));
        let luma = frame.analysis_luma(640).unwrap();
        assert_eq!(luma.dimensions(), (32, 16));
    }
}
