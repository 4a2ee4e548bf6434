//! Frame preparation for the external analysis API.
//!
//! Frames that the decision engine forwards are downscaled, exposure-corrected
//! and JPEG-encoded. The caller's frame is never modified.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::grayscale;
use image::RgbImage;

use crate::config::UploadConfig;
use crate::error::PreprocessError;
use crate::frame::{downscale_to_width, Frame};
use crate::quality::FrameQuality;

/// Linear `alpha * p + beta` correction.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Exposure {
    alpha: f32,
    beta: f32,
}

impl Exposure {
    const IDENTITY: Exposure = Exposure {
        alpha: 1.0,
        beta: 0.0,
    };

    fn for_quality(quality: &FrameQuality) -> Self {
        let mut exposure = if quality.is_dark() {
            Exposure {
                alpha: 1.2,
                beta: 20.0,
            }
        } else if quality.is_overexposed() {
            Exposure {
                alpha: 0.8,
                beta: -20.0,
            }
        } else {
            Exposure::IDENTITY
        };
        if quality.is_low_contrast() {
            exposure.alpha = 1.3;
        }
        exposure
    }

    fn apply(self, image: &mut RgbImage) {
        if self == Exposure::IDENTITY {
            return;
        }
        for value in image.iter_mut() {
            *value = (*value as f32 * self.alpha + self.beta).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// JPEG bytes of `frame`, at most `config.max_width` pixels wide.
pub fn prepare_for_upload(frame: &Frame, config: &UploadConfig) -> Result<Vec<u8>, PreprocessError> {
    if frame.is_empty() {
        return Err(PreprocessError::InvalidFrame("frame has no pixels".into()));
    }
    let rgb = frame
        .to_rgb()
        .map_err(|e| PreprocessError::InvalidFrame(format!("{:#}", e)))?;
    let mut rgb = downscale_to_width(rgb, config.max_width);

    let quality = FrameQuality::measure(&grayscale(&rgb));
    let exposure = Exposure::for_quality(&quality);
    log::trace!(
        "upload: {}x{} brightness {:.1} contrast {:.1} -> {:?}",
        rgb.width(),
        rgb.height(),
        quality.brightness,
        quality.contrast,
        exposure
    );
    exposure.apply(&mut rgb);

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, config.jpeg_quality).encode_image(&rgb)?;
    Ok(out.into_inner())
}
