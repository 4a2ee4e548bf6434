use anyhow::{anyhow, Result};
use image::GrayImage;
use imageproc::stats::percentile;

use crate::config::PixelConfig;
use crate::detect::backend::DetectionTier;
use crate::detect::result::{DetectionMethod, TierEstimate};

/// Last-resort estimate from how much of the frame departs from its median.
///
/// Deterministic: the same frame always yields the same count.
pub struct PixelOccupancyTier {
    config: PixelConfig,
}

impl PixelOccupancyTier {
    pub fn new(config: PixelConfig) -> Self {
        Self { config }
    }

    /// Fraction of pixels more than `pixel_delta` away from the median intensity.
    pub fn occupancy(&self, frame: &GrayImage) -> f64 {
        let total = frame.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let median = percentile(frame, 50);
        let delta = self.config.pixel_delta;
        let foreground = frame
            .as_raw()
            .iter()
            .filter(|&&p| p.abs_diff(median) > delta)
            .count();
        foreground as f64 / total as f64
    }

    pub fn persons_for_occupancy(&self, occupancy: f64) -> u32 {
        if occupancy < self.config.min_occupancy {
            return 0;
        }
        let scaled = (occupancy / self.config.occupancy_per_person).round() as u32;
        scaled.clamp(1, self.config.max_persons.max(1))
    }
}

impl DetectionTier for PixelOccupancyTier {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::PixelFallback
    }

    fn attempt(&self, frame: &GrayImage) -> Result<Option<TierEstimate>> {
        if frame.as_raw().is_empty() {
            return Err(anyhow!("pixel tier received an empty frame"));
        }
        let occupancy = self.occupancy(frame);
        Ok(Some(TierEstimate {
            persons: self.persons_for_occupancy(occupancy),
            method: self.method(),
        }))
    }
}
