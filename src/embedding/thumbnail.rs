use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{PrismError, Result};
use crate::index::distance::{l2_norm, l2_normalize};

use super::Encoder;

const MIN_SIGNAL: f32 = 1e-4;

/// Colour-layout embedding: the image shrunk to a small RGB thumbnail,
/// mean-centred per channel, zero-padded to `dimension` and normalized.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEncoder {
    dimension: usize,
    side: u32,
}

impl ThumbnailEncoder {
    pub fn new(dimension: usize) -> Result<Self> {
        let side = ((dimension / 3) as f64).sqrt().floor() as u32;
        if side == 0 {
            return Err(PrismError::Validation(format!(
                "thumbnail encoder needs dimension >= 3, got {dimension}"
            )));
        }
        Ok(Self { dimension, side })
    }

    /// Thumbnail edge length in pixels.
    pub fn side(&self) -> u32 {
        self.side
    }
}

impl Encoder for ThumbnailEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PrismError::Encoder("empty image".into()));
        }
        let thumb = imageops::resize(image, self.side, self.side, FilterType::Triangle);
        let pixels = (self.side * self.side) as f32;

        let mut mean = [0f32; 3];
        for px in thumb.pixels() {
            for c in 0..3 {
                mean[c] += px[c] as f32 / 255.0;
            }
        }
        for m in &mut mean {
            *m /= pixels;
        }

        let mut embedding = Vec::with_capacity(self.dimension);
        for px in thumb.pixels() {
            for c in 0..3 {
                embedding.push(px[c] as f32 / 255.0 - mean[c]);
            }
        }
        embedding.resize(self.dimension, 0.0);

        // Flat images leave only rounding noise after centring.
        if l2_norm(&embedding) < MIN_SIGNAL || !l2_normalize(&mut embedding) {
            return Err(PrismError::Encoder(
                "image has no colour variation to embed".into(),
            ));
        }
        Ok(embedding)
    }
}
