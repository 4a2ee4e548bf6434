use image::GrayImage;
use imageproc::edges::canny;
use serde::{Deserialize, Serialize};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Exposure and detail metrics of an analysis frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    /// Mean luma, 0..=255.
    pub brightness: f32,
    /// Luma standard deviation.
    pub contrast: f32,
    /// Fraction of pixels on a Canny edge.
    pub edge_density: f32,
    /// Weighted blend of the above in [0, 1].
    pub quality_score: f32,
}

impl FrameQuality {
    pub fn measure(frame: &GrayImage) -> Self {
        let pixels = frame.as_raw();
        if pixels.is_empty() {
            return Self::default();
        }

        let n = pixels.len() as f64;
        let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
        let variance = pixels
            .iter()
            .map(|&p| {
                let d = p as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        let edges = canny(frame, CANNY_LOW, CANNY_HIGH);
        let edge_pixels = edges.as_raw().iter().filter(|&&p| p > 0).count();

        let brightness = mean as f32;
        let contrast = variance.sqrt() as f32;
        let edge_density = (edge_pixels as f64 / n) as f32;
        Self {
            brightness,
            contrast,
            edge_density,
            quality_score: quality_score(brightness, contrast, edge_density),
        }
    }

    pub fn is_dark(&self) -> bool {
        self.brightness < 80.0
    }

    pub fn is_overexposed(&self) -> bool {
        self.brightness > 200.0
    }

    pub fn is_low_contrast(&self) -> bool {
        self.contrast < 30.0
    }
}

/// Brightness peaks at mid-gray; contrast and edges saturate.
fn quality_score(brightness: f32, contrast: f32, edge_density: f32) -> f32 {
    let brightness_score = 1.0 - (brightness - 128.0).abs() / 128.0;
    let contrast_score = (contrast / 100.0).min(1.0);
    let edge_score = (edge_density * 10.0).min(1.0);
    (brightness_score * 0.3 + contrast_score * 0.4 + edge_score * 0.3).clamp(0.0, 1.0)
}

/// Crowd density bucket by persons per 100x100 pixel patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrowdDensity {
    Sparse,
    Light,
    Moderate,
    Dense,
    VeryDense,
}

impl CrowdDensity {
    pub fn estimate(persons: u32, width: u32, height: u32) -> Self {
        let patches = (width as f64 * height as f64) / 10_000.0;
        if patches <= 0.0 {
            return CrowdDensity::Sparse;
        }
        let density = persons as f64 / patches;
        if density < 0.5 {
            CrowdDensity::Sparse
        } else if density < 1.0 {
            CrowdDensity::Light
        } else if density < 2.0 {
            CrowdDensity::Moderate
        } else if density < 4.0 {
            CrowdDensity::Dense
        } else {
            CrowdDensity::VeryDense
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_mid_gray_has_no_edges_or_contrast() {
        let q = FrameQuality::measure(&GrayImage::from_pixel(64, 64, Luma([128])));
        assert_eq!(q.brightness, 128.0);
        assert_eq!(q.contrast, 0.0);
        assert_eq!(q.edge_density, 0.0);
        assert!((q.quality_score - 0.3).abs() < 1e-6);
        assert!(q.is_low_contrast());
    }

    #[test]
    fn dark_frame_is_flagged() {
        let q = FrameQuality::measure(&GrayImage::from_pixel(16, 16, Luma([10])));
        assert!(q.is_dark());
        assert!(!q.is_overexposed());
    }

    #[test]
    fn density_buckets() {
        assert_eq!(CrowdDensity::estimate(0, 320, 240), CrowdDensity::Sparse);
        // 320x240 is 7.68 patches.
        assert_eq!(CrowdDensity::estimate(5, 320, 240), CrowdDensity::Light);
        assert_eq!(CrowdDensity::estimate(10, 320, 240), CrowdDensity::Moderate);
        assert_eq!(CrowdDensity::estimate(40, 320, 240), CrowdDensity::VeryDense);
    }
}
