use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{arc_length, contour_area};
use imageproc::integral_image::{integral_image, sum_image_pixels};

use crate::config::ContourConfig;
use crate::detect::backend::DetectionTier;
use crate::detect::result::{BoundingBox, DetectionMethod, TierEstimate};

/// Blob heuristic: adaptive threshold, outer contours, person-shaped filter.
///
/// Always answers when it runs to completion, including with zero people, so a
/// clean empty scene resolves here instead of falling to the pixel estimate.
pub struct ContourTier {
    config: ContourConfig,
}

impl ContourTier {
    pub fn new(config: ContourConfig) -> Self {
        Self { config }
    }

    /// Person-plausible outer contours in `frame`, before the count cap.
    pub fn candidate_boxes(&self, frame: &GrayImage) -> Result<Vec<BoundingBox>> {
        let block = 2 * self.config.block_radius + 1;
        if frame.width() < block || frame.height() < block {
            return Err(anyhow!(
                "frame {}x{} smaller than threshold block {}",
                frame.width(),
                frame.height(),
                block
            ));
        }

        let blurred = gaussian_blur_f32(frame, self.config.blur_sigma);
        let mask = adaptive_threshold_inv(
            &blurred,
            self.config.block_radius,
            self.config.threshold_offset,
        );

        let contours: Vec<Contour<i32>> = find_contours(&mask);
        Ok(contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| self.person_box(c))
            .collect())
    }

    fn person_box(&self, contour: &Contour<i32>) -> Option<BoundingBox> {
        if contour.points.len() < 3 {
            return None;
        }
        let area = contour_area(&contour.points).abs();
        if area < self.config.min_area || area > self.config.max_area {
            return None;
        }

        let bbox = bounding_box(contour);
        let aspect = (bbox.h / bbox.w) as f64;
        if aspect < self.config.min_aspect || aspect > self.config.max_aspect {
            return None;
        }

        let perimeter = arc_length(&contour.points, true);
        if perimeter <= 0.0 {
            return None;
        }
        // People are not round.
        let circularity = 4.0 * std::f64::consts::PI * area / (perimeter * perimeter);
        if circularity >= self.config.max_circularity {
            return None;
        }
        Some(bbox)
    }
}

impl DetectionTier for ContourTier {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::ContourFallback
    }

    fn attempt(&self, frame: &GrayImage) -> Result<Option<TierEstimate>> {
        let found = self.candidate_boxes(frame)?.len() as u32;
        let persons = found.min(self.config.max_persons);
        if found > persons {
            log::debug!(
                "contour tier capped {} candidates to {}",
                found,
                self.config.max_persons
            );
        }
        Ok(Some(TierEstimate {
            persons,
            method: self.method(),
        }))
    }
}

/// Inclusive pixel bounding box of a contour.
fn bounding_box(contour: &Contour<i32>) -> BoundingBox {
    let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
    let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    BoundingBox {
        x: min_x as f32,
        y: min_y as f32,
        w: (max_x - min_x + 1) as f32,
        h: (max_y - min_y + 1) as f32,
    }
}

/// Marks pixels darker than their local mean by more than `offset`.
///
/// The local window is `(2 * radius + 1)^2`, clipped at the frame border.
pub(crate) fn adaptive_threshold_inv(image: &GrayImage, radius: u32, offset: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    let integral = integral_image::<_, u64>(image);

    GrayImage::from_fn(width, height, |x, y| {
        let (left, top) = (x.saturating_sub(radius), y.saturating_sub(radius));
        let right = x.saturating_add(radius).min(width - 1);
        let bottom = y.saturating_add(radius).min(height - 1);
        let sum = sum_image_pixels(&integral, left, top, right, bottom)[0];
        let count = u64::from(right - left + 1) * u64::from(bottom - top + 1);
        let pixel = u64::from(image.get_pixel(x, y)[0]);
        if (pixel + u64::from(offset)) * count < sum {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SceneBuilder;

    #[test]
    fn uniform_frame_is_an_authoritative_zero() {
        let tier = ContourTier::new(ContourConfig::default());
        let frame = GrayImage::from_pixel(320, 240, Luma([128]));
        let estimate = tier.attempt(&frame).unwrap().unwrap();
        assert_eq!(estimate.persons, 0);
        assert_eq!(estimate.method, DetectionMethod::ContourFallback);
    }

    #[test]
    fn counts_separated_silhouettes() {
        let tier = ContourTier::new(ContourConfig::default());
        let frame = SceneBuilder::new(320, 240).render(3, 0);
        let estimate = tier.attempt(&frame).unwrap().unwrap();
        assert!((2..=4).contains(&estimate.persons), "got {}", estimate.persons);
    }

    #[test]
    fn rejects_round_blobs() {
        let tier = ContourTier::new(ContourConfig::default());
        let frame = GrayImage::from_fn(200, 200, |x, y| {
            let (dx, dy) = (x as i32 - 100, y as i32 - 100);
            if dx * dx + dy * dy < 30 * 30 {
                Luma([40])
            } else {
                Luma([200])
            }
        });
        assert_eq!(tier.attempt(&frame).unwrap().unwrap().persons, 0);
    }

    #[test]
    fn caps_runaway_counts() {
        let config = ContourConfig {
            max_persons: 2,
            ..ContourConfig::default()
        };
        let frame = SceneBuilder::new(480, 240).render(5, 0);
        let estimate = ContourTier::new(config).attempt(&frame).unwrap().unwrap();
        assert_eq!(estimate.persons, 2);
    }

    #[test]
    fn tiny_frames_fail_over() {
        let tier = ContourTier::new(ContourConfig::default());
        assert!(tier.attempt(&GrayImage::new(4, 4)).is_err());
    }

    #[test]
    fn threshold_marks_dark_pixels_only() {
        let mut frame = GrayImage::from_pixel(21, 21, Luma([200]));
        frame.put_pixel(10, 10, Luma([20]));
        let mask = adaptive_threshold_inv(&frame, 3, 2);
        assert_eq!(mask.get_pixel(10, 10)[0], 255);
        assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 1);
    }

    #[test]
    fn threshold_matches_clipped_local_mean() {
        let frame = GrayImage::from_fn(17, 13, |x, y| Luma([((x * 37 + y * 91) % 256) as u8]));
        let (radius, offset) = (2u32, 5u8);
        let mask = adaptive_threshold_inv(&frame, radius, offset);

        for (x, y, value) in mask.enumerate_pixels() {
            let (mut sum, mut count) = (0u64, 0u64);
            for ny in y.saturating_sub(radius)..=(y + radius).min(12) {
                for nx in x.saturating_sub(radius)..=(x + radius).min(16) {
                    sum += frame.get_pixel(nx, ny)[0] as u64;
                    count += 1;
                }
            }
            let pixel = frame.get_pixel(x, y)[0] as u64;
            let dark = (pixel + offset as u64) * count < sum;
            assert_eq!(value[0] == 255, dark, "pixel ({}, {})", x, y);
        }
    }
}
