//! Multi-scale sliding-window region proposals.
//!
//! A scan yields, in order: the base grid of `patch_size` windows, the same
//! grid over the image resized to each extra scale (boxes mapped back to
//! original coordinates), one centred crop, and one global entry holding the
//! whole image resized to a single patch.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use crate::config::ScannerConfig;
use crate::error::{PrismError, Result};
use crate::types::BoundingBox;

/// Extra scales applied to the patch window, relative to `patch_size`.
pub const EXTRA_SCALES: [f32; 3] = [0.5, 0.75, 1.25];

/// Scaled windows smaller than this are skipped.
pub const MIN_SCALED_WINDOW: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Grid,
    Scaled { percent: u32 },
    Center,
    Global,
}

/// A candidate sub-image and where it came from in the source image.
#[derive(Debug, Clone)]
pub struct Region {
    pub image: RgbImage,
    pub bbox: BoundingBox,
    pub kind: RegionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionScanner {
    patch_size: u32,
    stride: u32,
}

impl RegionScanner {
    pub fn new(patch_size: u32, stride: u32) -> Result<Self> {
        if patch_size == 0 || stride == 0 {
            return Err(PrismError::Validation(
                "patch size and stride must be > 0".into(),
            ));
        }
        Ok(Self { patch_size, stride })
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        Self::new(config.patch_size, config.stride)
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Produce every candidate region of `image`. Deterministic for a fixed
    /// image and configuration.
    pub fn scan(&self, image: &RgbImage) -> Result<Vec<Region>> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(PrismError::InvalidImage(format!(
                "cannot scan a {orig_w}x{orig_h} image"
            )));
        }

        let p = self.patch_size;
        let padded_buf = pad_to(image, p);
        let padded: &RgbImage = &padded_buf;
        let (w, h) = padded.dimensions();
        let mut regions = Vec::new();

        for y in grid_positions(h, p, self.stride) {
            for x in grid_positions(w, p, self.stride) {
                regions.push(Region {
                    image: imageops::crop_imm(padded, x, y, p, p).to_image(),
                    bbox: BoundingBox::new(x, y, p, p),
                    kind: RegionKind::Grid,
                });
            }
        }

        for scale in EXTRA_SCALES {
            let window = (p as f32 * scale) as u32;
            if window < MIN_SCALED_WINDOW || window > w.min(h) {
                debug!(scale, window, "skipping scale");
                continue;
            }
            let sw = (w as f32 * scale) as u32;
            let sh = (h as f32 * scale) as u32;
            if sw < window || sh < window {
                continue;
            }

            let scaled = imageops::resize(padded, sw, sh, FilterType::Triangle);
            let percent = (scale * 100.0).round() as u32;
            let mapped = (window as f32 / scale) as u32;

            for y in grid_positions(sh, window, self.stride) {
                for x in grid_positions(sw, window, self.stride) {
                    let bbox = BoundingBox::new(
                        (x as f32 / scale) as u32,
                        (y as f32 / scale) as u32,
                        mapped,
                        mapped,
                    )
                    .clamp(w, h);
                    regions.push(Region {
                        image: imageops::crop_imm(&scaled, x, y, window, window).to_image(),
                        bbox,
                        kind: RegionKind::Scaled { percent },
                    });
                }
            }
        }

        let cx = (w - p) / 2;
        let cy = (h - p) / 2;
        regions.push(Region {
            image: imageops::crop_imm(padded, cx, cy, p, p).to_image(),
            bbox: BoundingBox::new(cx, cy, p, p),
            kind: RegionKind::Center,
        });

        regions.push(Region {
            image: imageops::resize(image, p, p, FilterType::Triangle),
            bbox: BoundingBox::new(0, 0, orig_w, orig_h),
            kind: RegionKind::Global,
        });

        debug!(
            regions = regions.len(),
            width = orig_w,
            height = orig_h,
            "scanned image"
        );
        Ok(regions)
    }
}

/// Window origins along one axis: every `stride` from 0, plus a final window
/// flush with the far edge when the regular steps leave a remainder.
pub fn grid_positions(extent: u32, window: u32, stride: u32) -> Vec<u32> {
    if window == 0 || window > extent || stride == 0 {
        return Vec::new();
    }
    let last = extent - window;
    let mut positions: Vec<u32> = (0..=last).step_by(stride as usize).collect();
    if positions.last() != Some(&last) {
        positions.push(last);
    }
    positions
}

/// Edge-replicate `image` on the right and bottom so both sides are at least `min_side`.
fn pad_to(image: &RgbImage, min_side: u32) -> Cow<'_, RgbImage> {
    let (w, h) = image.dimensions();
    if w >= min_side && h >= min_side {
        return Cow::Borrowed(image);
    }
    let pw = w.max(min_side);
    let ph = h.max(min_side);
    Cow::Owned(RgbImage::from_fn(pw, ph, |x, y| {
        *image.get_pixel(x.min(w - 1), y.min(h - 1))
    }))
}
