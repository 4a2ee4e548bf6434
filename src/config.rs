use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "CROWD_PREPROCESS_CONFIG";

const DEFAULT_MAX_ANALYSIS_WIDTH: u32 = 640;
const DEFAULT_HIGH_CONFIDENCE_THRESHOLD: f32 = 0.75;

/// Top-level configuration for the preprocessing service.
///
/// Every threshold the stages use is a named field here so it can be tuned
/// per deployment and exercised independently in tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Frames wider than this are downscaled before analysis.
    pub max_analysis_width: u32,
    /// Minimum confidence at which the local estimate replaces a remote call.
    pub high_confidence_threshold: f32,
    pub motion: MotionConfig,
    pub hog: HogConfig,
    pub contour: ContourConfig,
    pub pixel: PixelConfig,
    pub roi: RoiConfig,
    pub upload: UploadConfig,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_analysis_width: DEFAULT_MAX_ANALYSIS_WIDTH,
            high_confidence_threshold: DEFAULT_HIGH_CONFIDENCE_THRESHOLD,
            motion: MotionConfig::default(),
            hog: HogConfig::default(),
            contour: ContourConfig::default(),
            pixel: PixelConfig::default(),
            roi: RoiConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

/// Motion level boundaries on the normalized mean absolute difference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionThresholds {
    /// Scores below this are `none`.
    pub none_below: f32,
    /// Scores below this are `low`.
    pub low_below: f32,
    /// Scores below this are `medium`; anything else is `high`.
    pub medium_below: f32,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            none_below: 0.002,
            low_below: 0.03,
            medium_below: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionConfig {
    /// Gaussian sigma applied before differencing.
    pub blur_sigma: f32,
    pub thresholds: MotionThresholds,
    /// Per-pixel difference that marks a pixel as changed.
    pub region_delta: u8,
    /// Changed regions of this many pixels or fewer are not counted.
    pub min_region_area: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            thresholds: MotionThresholds::default(),
            region_delta: 25,
            min_region_area: 500,
        }
    }
}

/// Primary pedestrian detector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HogConfig {
    /// Linear SVM model (JSON). The primary tier is disabled when unset.
    pub model_path: Option<PathBuf>,
    /// Window step in pixels.
    pub win_stride: u32,
    /// Pyramid downscale factor between levels.
    pub scale_step: f32,
    pub max_levels: u32,
    /// Raw SVM score a window must exceed to become a candidate.
    pub hit_threshold: f32,
    /// Candidates at or below this weight are discarded.
    pub min_weight: f32,
    pub nms_iou: f32,
}

impl Default for HogConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            win_stride: 8,
            scale_step: 1.2,
            max_levels: 6,
            hit_threshold: 0.0,
            min_weight: 0.5,
            nms_iou: 0.45,
        }
    }
}

/// Contour/blob fallback settings. Areas are in analysis-frame pixels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContourConfig {
    pub blur_sigma: f32,
    /// Adaptive threshold block is `2 * block_radius + 1` pixels wide.
    pub block_radius: u32,
    /// A pixel is foreground when darker than its local mean by more than this.
    pub threshold_offset: u8,
    pub min_area: f64,
    pub max_area: f64,
    /// Bounding-box height / width bounds.
    pub min_aspect: f64,
    pub max_aspect: f64,
    /// Contours at or above this circularity are rejected.
    pub max_circularity: f64,
    pub max_persons: u32,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            block_radius: 5,
            threshold_offset: 2,
            min_area: 400.0,
            max_area: 40_000.0,
            min_aspect: 1.2,
            max_aspect: 4.5,
            max_circularity: 0.8,
            max_persons: 25,
        }
    }
}

/// Pixel-occupancy last resort settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PixelConfig {
    /// Deviation from the frame median that marks a pixel as foreground.
    pub pixel_delta: u8,
    /// Occupancy below this fraction estimates nobody.
    pub min_occupancy: f64,
    /// Fraction of the frame one person is assumed to cover.
    pub occupancy_per_person: f64,
    pub max_persons: u32,
}

impl Default for PixelConfig {
    fn default() -> Self {
        Self {
            pixel_delta: 25,
            min_occupancy: 0.02,
            occupancy_per_person: 0.02,
            max_persons: 5,
        }
    }
}

/// Region-of-interest pass settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoiConfig {
    pub blur_sigma: f32,
    /// Shorter bounding-box side, in pixels.
    pub min_side: u32,
    /// Regions covering more than this fraction of the frame are background.
    pub max_frame_fraction: f64,
    /// Minimum height / width of a region.
    pub min_aspect: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            min_side: 8,
            max_frame_fraction: 0.5,
            min_aspect: 1.0,
        }
    }
}

/// Preparation of frames forwarded to the external analysis API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            jpeg_quality: 85,
        }
    }
}

impl PreprocessConfig {
    /// Load from the file named by `CROWD_PREPROCESS_CONFIG` (if set), apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV).ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, apply environment overrides, then validate.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = read_config_file(path)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("CROWD_CONFIDENCE_THRESHOLD") {
            self.high_confidence_threshold = value.trim().parse().map_err(|_| {
                anyhow!("CROWD_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Ok(value) = std::env::var("CROWD_MAX_ANALYSIS_WIDTH") {
            self.max_analysis_width = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CROWD_MAX_ANALYSIS_WIDTH must be an integer"))?;
        }
        if let Ok(path) = std::env::var("CROWD_HOG_MODEL") {
            if !path.trim().is_empty() {
                self.hog.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("CROWD_MOTION_BLUR_SIGMA") {
            self.motion.blur_sigma = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("CROWD_MOTION_BLUR_SIGMA must be a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.high_confidence_threshold) {
            return Err(anyhow!("high_confidence_threshold must be within [0, 1]"));
        }
        if self.max_analysis_width < 64 {
            return Err(anyhow!("max_analysis_width must be at least 64 pixels"));
        }

        let t = &self.motion.thresholds;
        if !(0.0 <= t.none_below && t.none_below < t.low_below && t.low_below < t.medium_below)
        {
            return Err(anyhow!(
                "motion thresholds must satisfy 0 <= none_below < low_below < medium_below"
            ));
        }
        if self.motion.region_delta == 0 {
            return Err(anyhow!("motion.region_delta must be non-zero"));
        }
        for (name, sigma) in [
            ("motion.blur_sigma", self.motion.blur_sigma),
            ("contour.blur_sigma", self.contour.blur_sigma),
            ("roi.blur_sigma", self.roi.blur_sigma),
        ] {
            if !(sigma > 0.0) {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }

        if self.hog.win_stride == 0 || self.hog.max_levels == 0 {
            return Err(anyhow!("hog.win_stride and hog.max_levels must be non-zero"));
        }
        if !(self.hog.scale_step > 1.0) {
            return Err(anyhow!("hog.scale_step must be greater than 1"));
        }
        if !(0.0..=1.0).contains(&self.hog.nms_iou) {
            return Err(anyhow!("hog.nms_iou must be within [0, 1]"));
        }

        let c = &self.contour;
        if c.block_radius == 0 {
            return Err(anyhow!("contour.block_radius must be non-zero"));
        }
        if !(c.min_area < c.max_area) || !(c.min_aspect < c.max_aspect) {
            return Err(anyhow!("contour area and aspect bounds must be increasing"));
        }

        if !(self.pixel.occupancy_per_person > 0.0) {
            return Err(anyhow!("pixel.occupancy_per_person must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.roi.max_frame_fraction) {
            return Err(anyhow!("roi.max_frame_fraction must be within [0, 1]"));
        }
        if self.upload.jpeg_quality == 0 || self.upload.jpeg_quality > 100 {
            return Err(anyhow!("upload.jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}

/// Reads JSON, or TOML when the file extension is `.toml`.
fn read_config_file(path: &Path) -> Result<PreprocessConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PreprocessConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_unordered_motion_thresholds() {
        let mut cfg = PreprocessConfig::default();
        cfg.motion.thresholds.low_below = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_confidence_out_of_bounds() {
        let cfg = PreprocessConfig {
            high_confidence_threshold: 1.5,
            ..PreprocessConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PreprocessConfig =
            serde_json::from_str(r#"{"contour": {"max_persons": 8}}"#).unwrap();
        assert_eq!(cfg.contour.max_persons, 8);
        assert_eq!(cfg.contour.min_area, ContourConfig::default().min_area);
        assert_eq!(cfg.max_analysis_width, DEFAULT_MAX_ANALYSIS_WIDTH);
    }
}
