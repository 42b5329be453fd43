use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;

use prism::catalog::Catalog;
use prism::config::Config;
use prism::detector::Detector;
use prism::embedding::Encoder;
use prism::error::{PrismError, Result};
use prism::index::SharedIndex;
use prism::types::EntryMetadata;
use prism::validators::{NullTextExtractor, TextExtractor, TextFragment};

/// Scale `v` to unit length.
pub fn unit(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// The `i`-th standard basis vector of dimension `dim`.
pub fn basis(dim: usize, i: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[i] = 1.0;
    v
}

/// Unit vector whose inner product with `basis(dim, 0)` is `similarity`.
pub fn at_similarity(dim: usize, similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[0] = similarity;
    v[1] = (1.0 - similarity * similarity).sqrt();
    v
}

/// Config rooted in a temp directory: index, catalog and reference files
/// all live under `root`.
pub fn test_config(root: &Path, dimension: usize) -> Config {
    let mut config = Config::default();
    config.index.dimension = dimension;
    config.index.path = root.join("index").join("product_index");
    config.catalog.path = root.join("products.json");
    config.catalog.reference_dir = root.join("references");
    config.auto_learning.learned_dir = root.join("references").join("learned");
    config
}

/// Metadata for a curated reference with no shape constraint.
pub fn metadata(name: &str, keywords: &[&str], ref_id: &str) -> EntryMetadata {
    let mut m = EntryMetadata::new(name);
    m.keywords = keywords.iter().map(|k| k.to_string()).collect();
    m.ref_id = Some(ref_id.to_string());
    m
}

pub fn detector(
    config: &Config,
    index: SharedIndex,
    catalog: Catalog,
    encoder: Arc<dyn Encoder>,
    ocr: Arc<dyn TextExtractor>,
) -> Detector {
    Detector::new(config, index, catalog, encoder, ocr).expect("detector")
}

pub fn detector_without_ocr(
    config: &Config,
    index: SharedIndex,
    encoder: Arc<dyn Encoder>,
) -> Detector {
    detector(
        config,
        index,
        Catalog::in_memory(vec![]),
        encoder,
        Arc::new(NullTextExtractor),
    )
}

// ─── Encoders ───

/// Returns the same embedding for every image.
pub struct FixedEncoder {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: unit(&vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for FixedEncoder {
    fn dimension(&self) -> usize {
        self.vector.len()
    }

    fn encode(&self, _image: &RgbImage) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// Fails on every image.
pub struct FailingEncoder {
    pub dimension: usize,
}

impl Encoder for FailingEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, _image: &RgbImage) -> Result<Vec<f32>> {
        Err(PrismError::Encoder("model unavailable".into()))
    }
}

/// Fails on images wider than `max_width`, otherwise returns `vector`.
pub struct PickyEncoder {
    pub vector: Vec<f32>,
    pub max_width: u32,
}

impl Encoder for PickyEncoder {
    fn dimension(&self) -> usize {
        self.vector.len()
    }

    fn encode(&self, image: &RgbImage) -> Result<Vec<f32>> {
        if image.width() > self.max_width {
            return Err(PrismError::Encoder("too wide".into()));
        }
        Ok(unit(&self.vector))
    }
}

// ─── OCR ───

/// Returns a fixed set of fragments and records what it was asked to read.
pub struct ScriptedOcr {
    fragments: Vec<TextFragment>,
    calls: AtomicUsize,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedOcr {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            fragments: texts.iter().map(|t| TextFragment::new(*t, 0.9)).collect(),
            calls: AtomicUsize::new(0),
            sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().clone()
    }
}

impl TextExtractor for ScriptedOcr {
    fn extract_text(&self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sizes.lock().push(image.dimensions());
        Ok(self.fragments.clone())
    }
}

pub struct FailingOcr;

impl TextExtractor for FailingOcr {
    fn extract_text(&self, _image: &RgbImage) -> Result<Vec<TextFragment>> {
        Err(PrismError::Ocr("engine crashed".into()))
    }
}
