use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Pixel layouts accepted from capture loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// One 8-bit luma channel.
    Gray8,
    /// Luma plus alpha, interleaved.
    GrayAlpha8,
    /// Interleaved 8-bit R, G, B.
    Rgb24,
    /// Y plane followed by an interleaved UV plane subsampled 2x2. Odd
    /// widths and heights round the chroma plane up.
    Nv12,
}

impl PixelFormat {
    /// Number of bytes a `width` x `height` frame occupies in this layout.
    pub fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let plane = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelFormat::Gray8 => Some(plane),
            PixelFormat::GrayAlpha8 => plane.checked_mul(2),
            PixelFormat::Rgb24 => plane.checked_mul(3),
            PixelFormat::Nv12 => {
                let (row, rows) = nv12_chroma_dims(width, height);
                row.checked_mul(rows).and_then(|chroma| plane.checked_add(chroma))
            }
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }

    pub fn channels(self) -> u8 {
        match self {
            PixelFormat::Gray8 | PixelFormat::Nv12 => 1,
            PixelFormat::GrayAlpha8 => 2,
            PixelFormat::Rgb24 => 3,
        }
    }
}

fn check_len(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<()> {
    let expected = format.expected_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

/// Convert any supported layout to a single luma plane.
pub(crate) fn normalize_to_luma(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<GrayImage> {
    check_len(pixels, width, height, format)?;
    let plane = width as usize * height as usize;
    let luma: Vec<u8> = match format {
        PixelFormat::Gray8 => pixels.to_vec(),
        // NV12 luma is the Y plane as-is.
        PixelFormat::Nv12 => pixels[..plane].to_vec(),
        PixelFormat::GrayAlpha8 => pixels.chunks_exact(2).map(|px| px[0]).collect(),
        PixelFormat::Rgb24 => pixels
            .chunks_exact(3)
            .map(|px| rgb_to_luma(px[0], px[1], px[2]))
            .collect(),
    };
    GrayImage::from_raw(width, height, luma)
        .ok_or_else(|| anyhow!("luma buffer does not match {}x{}", width, height))
}

/// Convert any supported layout to interleaved RGB.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RgbImage> {
    check_len(pixels, width, height, format)?;
    let rgb: Vec<u8> = match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Gray8 => pixels.iter().flat_map(|&y| [y, y, y]).collect(),
        PixelFormat::GrayAlpha8 => pixels
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0]])
            .collect(),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    };
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))
}

fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    clamp_to_u8(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
}

/// Bytes per chroma row and number of chroma rows.
fn nv12_chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (
        2 * (width as usize).div_ceil(2),
        (height as usize).div_ceil(2),
    )
}

// Caller has already validated the buffer length.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let (uv_stride, _) = nv12_chroma_dims(width, height);

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb.into_raw(), vec![128u8; 12]);

        let luma = normalize_to_luma(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(luma.into_raw(), vec![128u8; 4]);
        Ok(())
    }

    #[test]
    fn nv12_odd_dimensions_round_chroma_up() -> Result<()> {
        assert_eq!(PixelFormat::Nv12.expected_len(3, 2)?, 6 + 4);
        assert_eq!(PixelFormat::Nv12.expected_len(3, 3)?, 9 + 8);
        assert_eq!(PixelFormat::Nv12.expected_len(4, 4)?, 16 + 8);

        // Right column reads the second chroma pair: U=128, V=200.
        let nv12 = [vec![100u8; 6], vec![128, 128, 128, 200]].concat();
        let rgb = normalize_to_rgb(&nv12, 3, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb.get_pixel(0, 1).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(2, 1).0[0], clamp_to_u8(100.0 + 1.402 * 72.0));

        assert!(normalize_to_rgb(&[0u8; 9], 3, 2, PixelFormat::Nv12).is_err());
        Ok(())
    }

    #[test]
    fn rgb_luma_uses_weighted_channels() -> Result<()> {
        let pixels = vec![255, 255, 255, 255, 0, 0];
        let luma = normalize_to_luma(&pixels, 2, 1, PixelFormat::Rgb24)?;
        assert_eq!(luma.get_pixel(0, 0)[0], 255);
        assert_eq!(luma.get_pixel(1, 0)[0], 76);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let pixels = vec![1u8; 8];
        assert!(normalize_to_luma(&pixels, 1, 3, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&pixels, 2, 2, PixelFormat::GrayAlpha8).is_ok());
    }
}
