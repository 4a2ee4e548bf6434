//! Frame-to-frame motion estimation.

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{MotionConfig, MotionThresholds};
use crate::source::SourceState;

/// Coarse motion classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionLevel {
    None,
    Low,
    Medium,
    High,
}

impl MotionLevel {
    pub fn classify(score: f32, thresholds: &MotionThresholds) -> Self {
        if score < thresholds.none_below {
            MotionLevel::None
        } else if score < thresholds.low_below {
            MotionLevel::Low
        } else if score < thresholds.medium_below {
            MotionLevel::Medium
        } else {
            MotionLevel::High
        }
    }

    /// Stable enough that the local estimate is not a transient blur.
    pub fn is_stable(self) -> bool {
        matches!(self, MotionLevel::None | MotionLevel::Low)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionEstimate {
    pub level: MotionLevel,
    /// Mean absolute difference of blurred frames, normalized to [0, 1].
    pub score: f32,
    /// No previous frame existed for the source; this frame is the new baseline.
    pub baseline: bool,
    /// Connected changed regions larger than `min_region_area`. Zero when
    /// there is nothing to compare against.
    pub moving_regions: u32,
}

/// Compares each frame against the previous frame of the same source.
#[derive(Clone, Debug)]
pub struct MotionEstimator {
    config: MotionConfig,
}

impl MotionEstimator {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// Classify motion and store a blurred copy of `frame` as the source's new
    /// baseline. `frame` itself is left untouched.
    pub fn estimate(&self, frame: &GrayImage, state: &mut SourceState) -> MotionEstimate {
        let blurred = gaussian_blur_f32(frame, self.config.blur_sigma);
        let fingerprint = fingerprint(&blurred);

        let estimate = match state.previous.as_ref() {
            None => MotionEstimate {
                level: MotionLevel::None,
                score: 0.0,
                baseline: true,
                moving_regions: 0,
            },
            Some(previous) if previous.dimensions() != blurred.dimensions() => {
                log::debug!(
                    "frame size changed {:?} -> {:?}; treating as scene cut",
                    previous.dimensions(),
                    blurred.dimensions()
                );
                MotionEstimate {
                    level: MotionLevel::High,
                    score: 1.0,
                    baseline: false,
                    moving_regions: 0,
                }
            }
            Some(previous) => {
                let (score, moving_regions) = if state.previous_fingerprint == Some(fingerprint) {
                    (0.0, 0)
                } else {
                    (
                        mean_abs_diff(previous, &blurred),
                        self.moving_regions(previous, &blurred),
                    )
                };
                MotionEstimate {
                    level: MotionLevel::classify(score, &self.config.thresholds),
                    score,
                    baseline: false,
                    moving_regions,
                }
            }
        };

        state.previous = Some(blurred);
        state.previous_fingerprint = Some(fingerprint);
        state.last_motion_score = estimate.score;
        estimate
    }

    // Both images must share dimensions.
    fn moving_regions(&self, previous: &GrayImage, current: &GrayImage) -> u32 {
        let delta = self.config.region_delta;
        let mask = GrayImage::from_fn(current.width(), current.height(), |x, y| {
            if previous.get_pixel(x, y)[0].abs_diff(current.get_pixel(x, y)[0]) > delta {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        if mask.as_raw().iter().all(|&p| p == 0) {
            return 0;
        }

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0]));
        let mut areas: Vec<u32> = Vec::new();
        for label in labels.pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if areas.len() <= label {
                areas.resize(label + 1, 0);
            }
            areas[label] += 1;
        }
        areas
            .into_iter()
            .filter(|&area| area > self.config.min_region_area)
            .count() as u32
    }
}

fn fingerprint(image: &GrayImage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().into()
}

// Both images must share dimensions.
fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f32 {
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    let pixels = a.as_raw().len().max(1) as f64;
    (total as f64 / pixels / 255.0) as f32
}
