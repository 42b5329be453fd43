//! Keyword verification through an external OCR engine.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::BoundingBox;

/// One piece of recognised text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

/// OCR engine boundary.
pub trait TextExtractor: Send + Sync {
    /// # Errors
    /// Returns `PrismError::Ocr` when recognition fails. Callers treat an
    /// error exactly like an empty result.
    fn extract_text(&self, image: &RgbImage) -> Result<Vec<TextFragment>>;
}

/// Extractor used when no OCR engine is available: recognises nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTextExtractor;

impl TextExtractor for NullTextExtractor {
    fn extract_text(&self, _image: &RgbImage) -> Result<Vec<TextFragment>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextVerification {
    pub verified: bool,
    pub matched_keywords: Vec<String>,
}

#[derive(Clone)]
pub struct TextValidator {
    extractor: Arc<dyn TextExtractor>,
    max_side: u32,
}

impl TextValidator {
    pub fn new(extractor: Arc<dyn TextExtractor>, max_side: u32) -> Self {
        Self {
            extractor,
            max_side,
        }
    }

    /// Run OCR on `image` and look for any of `keywords`.
    ///
    /// Images whose longer side exceeds `max_side` are downscaled first.
    /// OCR failures yield an unverified result.
    pub fn validate(&self, image: &RgbImage, keywords: &[String]) -> TextVerification {
        if keywords.is_empty() || image.width() == 0 || image.height() == 0 {
            return TextVerification::default();
        }

        let bounded = self.bounded(image);
        let fragments = match self.extractor.extract_text(bounded.as_ref().unwrap_or(image)) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(error = %e, "ocr failed, treating as no text");
                crate::metrics::OCR_CALLS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                return TextVerification::default();
            }
        };

        let matched_keywords = match_keywords(&fragments, keywords);
        let verified = !matched_keywords.is_empty();
        crate::metrics::OCR_CALLS_TOTAL
            .with_label_values(&[if verified { "verified" } else { "unverified" }])
            .inc();
        debug!(
            fragments = fragments.len(),
            matched = ?matched_keywords,
            "text verification"
        );

        TextVerification {
            verified,
            matched_keywords,
        }
    }

    fn bounded(&self, image: &RgbImage) -> Option<RgbImage> {
        let longer = image.width().max(image.height());
        if longer <= self.max_side || self.max_side == 0 {
            return None;
        }
        let scale = self.max_side as f64 / longer as f64;
        let w = ((image.width() as f64 * scale) as u32).max(1);
        let h = ((image.height() as f64 * scale) as u32).max(1);
        Some(imageops::resize(image, w, h, FilterType::Triangle))
    }
}

/// Keywords occurring, case-insensitively, in the space-joined fragment text.
/// Keeps the order of `keywords`.
pub fn match_keywords(fragments: &[TextFragment], keywords: &[String]) -> Vec<String> {
    let haystack = fragments
        .iter()
        .map(|f| f.text.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    keywords
        .iter()
        .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .cloned()
        .collect()
}
