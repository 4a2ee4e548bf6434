use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::hog::{hog, HogOptions, HogSpec};
use serde::{Deserialize, Serialize};

use crate::config::HogConfig;
use crate::detect::backend::DetectionTier;
use crate::detect::result::{non_max_suppression, BoundingBox, DetectionMethod, TierEstimate};

/// Linear SVM over HOG descriptors of a fixed detection window.
///
/// The descriptor layout is the one `imageproc::hog` produces for the stored
/// options, so weights must be trained against that layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HogModel {
    pub window_width: u32,
    pub window_height: u32,
    pub orientations: usize,
    pub signed: bool,
    pub cell_side: usize,
    pub block_side: usize,
    pub block_stride: usize,
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl HogModel {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read HOG model {}", path.display()))?;
        let model: HogModel = serde_json::from_str(&raw)
            .with_context(|| format!("invalid HOG model {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    /// Model with every weight set to `weight`. Mostly useful for calibration.
    pub fn uniform(window_width: u32, window_height: u32, weight: f32, bias: f32) -> Result<Self> {
        let mut model = Self {
            window_width,
            window_height,
            orientations: 9,
            signed: false,
            cell_side: 8,
            block_side: 2,
            block_stride: 1,
            weights: Vec::new(),
            bias,
        };
        model.weights = vec![weight; model.descriptor_length()?];
        Ok(model)
    }

    fn options(&self) -> HogOptions {
        HogOptions::new(
            self.orientations,
            self.signed,
            self.cell_side,
            self.block_side,
            self.block_stride,
        )
    }

    fn descriptor_length(&self) -> Result<usize> {
        let spec = HogSpec::from_options(self.window_width, self.window_height, self.options())
            .map_err(|e| anyhow!("invalid HOG window: {}", e))?;
        Ok(spec.descriptor_length())
    }

    pub fn validate(&self) -> Result<()> {
        let expected = self.descriptor_length()?;
        if self.weights.len() != expected {
            return Err(anyhow!(
                "HOG model has {} weights, window needs {}",
                self.weights.len(),
                expected
            ));
        }
        Ok(())
    }

    fn block_len(&self) -> usize {
        self.block_side * self.block_side * self.orientations
    }

    /// Largest cell count not above `cells` that blocks tile exactly.
    fn aligned_cells(&self, cells: usize) -> usize {
        cells - (cells - self.block_side) % self.block_stride
    }

    fn blocks(&self, cells_wide: usize, cells_high: usize) -> (usize, usize) {
        let (side, stride) = (self.block_side, self.block_stride);
        (
            (cells_wide + stride - side) / stride,
            (cells_high + stride - side) / stride,
        )
    }

    fn window_blocks(&self) -> (usize, usize) {
        self.blocks(
            self.window_width as usize / self.cell_side,
            self.window_height as usize / self.cell_side,
        )
    }
}

/// Sliding-window pedestrian detector over an image pyramid.
pub struct HogPersonTier {
    model: HogModel,
    config: HogConfig,
}

impl HogPersonTier {
    pub fn new(model: HogModel, config: HogConfig) -> Result<Self> {
        model.validate()?;
        Ok(Self { model, config })
    }

    pub fn from_config(config: &HogConfig) -> Result<Option<Self>> {
        match &config.model_path {
            Some(path) => {
                let model = HogModel::load(path)?;
                log::info!(
                    "loaded HOG person model {} ({}x{} window)",
                    path.display(),
                    model.window_width,
                    model.window_height
                );
                Ok(Some(Self::new(model, config.clone())?))
            }
            None => Ok(None),
        }
    }

    /// Weighted detections in analysis-frame coordinates, after NMS.
    ///
    /// The HOG descriptor is computed once per pyramid level and each window
    /// is scored from the blocks it covers. Window positions snap to the
    /// block grid, so the effective stride is `win_stride` rounded up to a
    /// whole number of block strides.
    pub fn detections(&self, frame: &GrayImage) -> Result<Vec<(BoundingBox, f32)>> {
        let (win_w, win_h) = (self.model.window_width, self.model.window_height);
        if frame.width() < win_w || frame.height() < win_h {
            return Err(anyhow!(
                "frame {}x{} smaller than detection window {}x{}",
                frame.width(),
                frame.height(),
                win_w,
                win_h
            ));
        }

        let mut candidates = Vec::new();
        let mut scale = 1.0f32;
        for level_index in 0..self.config.max_levels {
            let level_w = (frame.width() as f32 / scale) as u32;
            let level_h = (frame.height() as f32 / scale) as u32;
            if level_w < win_w || level_h < win_h {
                break;
            }
            let resized;
            let level = if level_index == 0 {
                frame
            } else {
                resized = imageops::resize(frame, level_w, level_h, FilterType::Triangle);
                &resized
            };
            self.scan_level(level, scale, &mut candidates)?;
            scale *= self.config.scale_step;
        }

        candidates.retain(|(_, weight)| *weight > self.config.min_weight);
        Ok(non_max_suppression(candidates, self.config.nms_iou))
    }

    /// Window step in blocks.
    fn step_blocks(&self) -> usize {
        let block_px = self.model.cell_side * self.model.block_stride;
        (self.config.win_stride as usize).div_ceil(block_px).max(1)
    }

    /// Pushes every window of `level` scoring above `hit_threshold`, with
    /// boxes scaled back by `scale`.
    fn scan_level(
        &self,
        level: &GrayImage,
        scale: f32,
        candidates: &mut Vec<(BoundingBox, f32)>,
    ) -> Result<()> {
        let model = &self.model;
        let cell = model.cell_side;
        let cells_w = model.aligned_cells(level.width() as usize / cell);
        let cells_h = model.aligned_cells(level.height() as usize / cell);
        let cropped =
            imageops::crop_imm(level, 0, 0, (cells_w * cell) as u32, (cells_h * cell) as u32)
                .to_image();
        let descriptor =
            hog(&cropped, model.options()).map_err(|e| anyhow!("hog failed: {}", e))?;

        let block_len = model.block_len();
        let (level_bw, level_bh) = model.blocks(cells_w, cells_h);
        if descriptor.len() != level_bw * level_bh * block_len {
            return Err(anyhow!(
                "hog descriptor has {} values, expected {}x{} blocks",
                descriptor.len(),
                level_bw,
                level_bh
            ));
        }
        let (win_bw, win_bh) = model.window_blocks();
        let row_len = win_bw * block_len;
        let block_px = (model.block_stride * cell) as f32;
        let step = self.step_blocks();

        for by in (0..=level_bh - win_bh).step_by(step) {
            for bx in (0..=level_bw - win_bw).step_by(step) {
                let mut weight = model.bias;
                for wy in 0..win_bh {
                    // A row of window blocks is contiguous in the level descriptor.
                    let start = ((by + wy) * level_bw + bx) * block_len;
                    weight += dot(
                        &descriptor[start..start + row_len],
                        &model.weights[wy * row_len..(wy + 1) * row_len],
                    );
                }
                if weight > self.config.hit_threshold {
                    candidates.push((
                        BoundingBox {
                            x: bx as f32 * block_px * scale,
                            y: by as f32 * block_px * scale,
                            w: model.window_width as f32 * scale,
                            h: model.window_height as f32 * scale,
                        },
                        weight,
                    ));
                }
            }
        }
        Ok(())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl DetectionTier for HogPersonTier {
    fn name(&self) -> &'static str {
        "hog"
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::PrimaryDetector
    }

    fn attempt(&self, frame: &GrayImage) -> Result<Option<TierEstimate>> {
        let detections = self.detections(frame)?;
        if detections.is_empty() {
            return Ok(None);
        }
        Ok(Some(TierEstimate {
            persons: detections.len() as u32,
            method: self.method(),
        }))
    }
}
