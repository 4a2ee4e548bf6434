//! Region-of-interest pass.
//!
//! A cheap corroborating signal: counts connected foreground regions whose
//! bounding boxes could hold a standing person. Its count is compared with the
//! cascade's estimate and never replaces it.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::RoiConfig;
use crate::detect::result::BoundingBox;

pub struct RoiDetector {
    config: RoiConfig,
}

impl RoiDetector {
    pub fn new(config: RoiConfig) -> Self {
        Self { config }
    }

    pub fn count(&self, frame: &GrayImage) -> u32 {
        self.regions(frame).len() as u32
    }

    pub fn regions(&self, frame: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let blurred = gaussian_blur_f32(frame, self.config.blur_sigma);
        let level = otsu_level(&blurred);
        let bright = blurred.as_raw().iter().filter(|&&p| p > level).count();
        let dark = blurred.as_raw().len() - bright;
        if bright == 0 || dark == 0 {
            return Vec::new();
        }

        // The minority class is taken as foreground.
        let foreground_is_bright = bright < dark;
        let mask = GrayImage::from_fn(width, height, |x, y| {
            let is_bright = blurred.get_pixel(x, y)[0] > level;
            if is_bright == foreground_is_bright {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0]));
        let mut extents: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if extents.len() <= label {
                extents.resize(label + 1, None);
            }
            extents[label] = Some(match extents[label] {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        let frame_area = (width as f64) * (height as f64);
        extents
            .into_iter()
            .flatten()
            .map(|(x0, y0, x1, y1)| BoundingBox {
                x: x0 as f32,
                y: y0 as f32,
                w: (x1 - x0 + 1) as f32,
                h: (y1 - y0 + 1) as f32,
            })
            .filter(|b| {
                let short_side = b.w.min(b.h) as u32;
                short_side >= self.config.min_side
                    && (b.area() as f64) / frame_area <= self.config.max_frame_fraction
                    && (b.h as f64) >= (b.w as f64) * self.config.min_aspect
            })
            .collect()
    }
}
