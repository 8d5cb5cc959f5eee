//! Fingerprints: compact, comparable summaries of a rendered story
//!
//! The screenshot is reduced to a block-mean perceptual hash, the markup and
//! stylesheet text to content hashes. Only these hashes are ever stored.

use image::RgbaImage;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capture::CaptureResult;
use crate::error::{VisageError, VisageResult};

/// Grid size of the perceptual hash (16x16 blocks, 256 bits)
pub const PERCEPTUAL_HASH_BITS: u32 = 16;

/// Length of a perceptual hash in hex characters
pub const PERCEPTUAL_HASH_HEX_LEN: usize = (PERCEPTUAL_HASH_BITS * PERCEPTUAL_HASH_BITS / 4) as usize;

/// Durable representation of one story's rendered state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub component: String,
    pub viewport: String,
    pub visual_hash: String,
    pub markup_hash: String,
    pub style_hash: String,
    pub timestamp: i64,
}

/// Hash field of a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintField {
    Visual,
    Markup,
    Style,
}

impl FingerprintField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintField::Visual => "visual",
            FingerprintField::Markup => "markup",
            FingerprintField::Style => "style",
        }
    }
}

impl Fingerprint {
    /// Fingerprint a capture. Decodes the screenshot, so callers on an async
    /// runtime should run this on the blocking pool.
    pub fn from_capture(
        component: impl Into<String>,
        viewport: impl Into<String>,
        capture: &CaptureResult,
    ) -> VisageResult<Self> {
        Ok(Self {
            component: component.into(),
            viewport: viewport.into(),
            visual_hash: perceptual_hash(capture.screenshot())?,
            markup_hash: markup_hash(capture.markup()),
            style_hash: style_hash(capture.style()),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    /// Hash fields that differ from `other`; identity and timestamp are ignored
    pub fn differences(&self, other: &Fingerprint) -> Vec<FingerprintField> {
        let mut fields = Vec::new();
        if self.visual_hash != other.visual_hash {
            fields.push(FingerprintField::Visual);
        }
        if self.markup_hash != other.markup_hash {
            fields.push(FingerprintField::Markup);
        }
        if self.style_hash != other.style_hash {
            fields.push(FingerprintField::Style);
        }
        fields
    }

    /// All three hashes equal
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.differences(other).is_empty()
    }
}

/// MD5 of the exact markup bytes, as lowercase hex
pub fn markup_hash(markup: &str) -> String {
    hex::encode(Md5::digest(markup.as_bytes()))
}

/// SHA-256 of the exact stylesheet text bytes, as lowercase hex
pub fn style_hash(style: &str) -> String {
    hex::encode(Sha256::digest(style.as_bytes()))
}

/// Decode a screenshot and compute its 256-bit blockhash as hex
pub fn perceptual_hash(screenshot: &[u8]) -> VisageResult<String> {
    let image = image::load_from_memory(screenshot)?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(VisageError::InvalidScreenshot("image has no pixels".into()));
    }
    Ok(bits_to_hex(&blockhash(&image, PERCEPTUAL_HASH_BITS)))
}

/// Block-mean hash over a `bits` x `bits` grid.
///
/// Pixel value is r+g+b, with fully transparent pixels counted as white.
/// When the image size is not a multiple of the grid, pixels straddling a
/// block boundary contribute to both blocks in proportion to their overlap.
pub fn blockhash(image: &RgbaImage, bits: u32) -> Vec<bool> {
    let (width, height) = image.dimensions();
    let grid = bits as usize;
    let mut blocks = vec![0f64; grid * grid];

    let block_width = f64::from(width) / f64::from(bits);
    let block_height = f64::from(height) / f64::from(bits);
    let even_x = width % bits == 0;
    let even_y = height % bits == 0;
    let last = grid - 1;

    for y in 0..height {
        let (top, bottom, weight_top, weight_bottom) = block_span(y, height, block_height, even_y, last);

        for x in 0..width {
            let (left, right, weight_left, weight_right) = block_span(x, width, block_width, even_x, last);

            let pixel = image.get_pixel(x, y).0;
            let value = if pixel[3] == 0 {
                765.0
            } else {
                f64::from(pixel[0]) + f64::from(pixel[1]) + f64::from(pixel[2])
            };

            blocks[top * grid + left] += value * weight_top * weight_left;
            blocks[top * grid + right] += value * weight_top * weight_right;
            blocks[bottom * grid + left] += value * weight_bottom * weight_left;
            blocks[bottom * grid + right] += value * weight_bottom * weight_right;
        }
    }

    let pixels_per_block = block_width * block_height;
    threshold_bands(&blocks, pixels_per_block)
}

/// Blocks covered by pixel `pos` along one axis, with their weights
fn block_span(pos: u32, size: u32, block_size: f64, even: bool, last: usize) -> (usize, usize, f64, f64) {
    let index = |v: f64| (v as usize).min(last);
    let start = index(f64::from(pos) / block_size);

    if even {
        return (start, start, 1.0, 0.0);
    }

    let offset = (f64::from(pos) + 1.0) % block_size;
    let frac = offset.fract();
    let whole = offset.trunc();
    let weight_first = 1.0 - frac;
    let weight_second = frac;

    if whole > 0.0 || pos + 1 == size {
        (start, start, weight_first, weight_second)
    } else {
        let end = index((f64::from(pos) / block_size).ceil());
        (start, end, weight_first, weight_second)
    }
}

/// Threshold each quarter of the blocks against its own median
fn threshold_bands(blocks: &[f64], pixels_per_block: f64) -> Vec<bool> {
    let half_block_value = pixels_per_block * 256.0 * 3.0 / 2.0;
    let band_size = blocks.len() / 4;

    blocks
        .chunks(band_size.max(1))
        .flat_map(|band| {
            let m = median(band);
            band.iter()
                .map(move |&v| v > m || ((v - m).abs() < 1.0 && m > half_block_value))
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn bits_to_hex(bits: &[bool]) -> String {
    bits.chunks(4)
        .map(|nibble| {
            let value = nibble.iter().fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit));
            char::from_digit(value, 16).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba};
    use std::io::Cursor;

    fn png(image: RgbaImage) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn split_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn test_content_hashes_are_stable() {
        assert_eq!(markup_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            style_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(markup_hash("<div>a</div>"), markup_hash("<div>a</div>"));
    }

    #[test]
    fn test_content_hashes_are_exact() {
        assert_ne!(markup_hash("<div>a</div>"), markup_hash("<DIV>a</DIV>"));
        assert_ne!(style_hash(".a { color: red; }"), style_hash(".a {color: red;}"));
    }

    #[test]
    fn test_perceptual_hash_shape() {
        let hash = perceptual_hash(&png(split_image(64, 48))).unwrap();
        assert_eq!(hash.len(), PERCEPTUAL_HASH_HEX_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_perceptual_hash_deterministic() {
        let bytes = png(split_image(50, 37));
        assert_eq!(perceptual_hash(&bytes).unwrap(), perceptual_hash(&bytes).unwrap());
    }

    #[test]
    fn test_perceptual_hash_left_dark_right_light() {
        // Every row: eight dark blocks, then eight light ones.
        let hash = perceptual_hash(&png(split_image(32, 32))).unwrap();
        assert_eq!(hash, "00ff".repeat(16));
    }

    #[test]
    fn test_perceptual_hash_uneven_size_matches_scaled() {
        let even = perceptual_hash(&png(split_image(32, 32))).unwrap();
        let uneven = perceptual_hash(&png(split_image(50, 30))).unwrap();
        assert_eq!(even, uneven);
    }

    #[test]
    fn test_perceptual_hash_distinguishes_layouts() {
        let flipped = RgbaImage::from_fn(32, 32, |_, y| {
            if y < 16 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        assert_ne!(
            perceptual_hash(&png(split_image(32, 32))).unwrap(),
            perceptual_hash(&png(flipped)).unwrap()
        );
    }

    #[test]
    fn test_invalid_screenshot_rejected() {
        assert!(perceptual_hash(b"not a png").is_err());
    }

    #[test]
    fn test_differences() {
        let base = Fingerprint {
            component: "atoms-button--primary".into(),
            viewport: "full".into(),
            visual_hash: "aa".into(),
            markup_hash: "bb".into(),
            style_hash: "cc".into(),
            timestamp: 1,
        };
        let mut other = base.clone();
        other.timestamp = 2;
        assert!(base.matches(&other));

        other.style_hash = "dd".into();
        assert_eq!(base.differences(&other), vec![FingerprintField::Style]);
        assert!(!base.matches(&other));
    }
}
