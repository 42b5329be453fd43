//! Image encoder boundary.
//!
//! The detector only needs `encode(image) -> unit vector`; a pretrained
//! model plugs in by implementing `Encoder`. `ThumbnailEncoder` is the
//! deterministic built-in used when no model is configured.

pub mod thumbnail;

pub use thumbnail::ThumbnailEncoder;

use image::RgbImage;

use crate::error::Result;

/// Trait every image encoder must satisfy.
///
/// Implementations must be deterministic for identical pixels and must
/// return L2-normalized vectors of exactly `dimension()` floats.
pub trait Encoder: Send + Sync {
    /// Length of every returned embedding.
    fn dimension(&self) -> usize;

    /// Embed one image.
    ///
    /// # Errors
    /// Returns `PrismError::Encoder` when the image cannot be embedded.
    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>>;

    /// Embed several images; each row is normalized independently.
    fn encode_batch(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        images.iter().map(|image| self.encode(image)).collect()
    }
}
