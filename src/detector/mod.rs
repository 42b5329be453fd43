//! Detection pipeline: scan, embed, search, score, fuse, verify, learn.

pub mod fusion;
pub mod references;
pub mod stage;

pub use fusion::{Candidate, Cluster};
pub use references::{IngestReport, ProductUpdate, ReferenceSummary};
pub use stage::{RegionOutcome, SkipReason};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::{imageops, RgbImage};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::{Config, DetectionConfig};
use crate::embedding::Encoder;
use crate::error::{PrismError, Result};
use crate::index::SharedIndex;
use crate::learning::{AutoLearner, LearnTemplate, LearnerStats};
use crate::scanner::{Region, RegionScanner};
use crate::types::{DetectionResult, ProductId};
use crate::validators::{ShapeValidator, TextExtractor, TextValidator, TextVerification};

use fusion::OCR_CONFIDENCE_GATE;

pub struct Detector {
    scanner: RegionScanner,
    index: SharedIndex,
    encoder: Arc<dyn Encoder>,
    text_validator: TextValidator,
    learner: AutoLearner,
    catalog: RwLock<Catalog>,
    detection: DetectionConfig,
    reference_dir: PathBuf,
}

impl Detector {
    /// # Errors
    /// `DimensionMismatch` when the encoder and index disagree on dimension,
    /// `Config` when the scanner parameters are invalid.
    pub fn new(
        config: &Config,
        index: SharedIndex,
        catalog: Catalog,
        encoder: Arc<dyn Encoder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self> {
        if encoder.dimension() != index.dimension() {
            return Err(PrismError::DimensionMismatch {
                expected: index.dimension(),
                actual: encoder.dimension(),
            });
        }
        let scanner = RegionScanner::from_config(&config.scanner)?;
        info!(
            patch_size = scanner.patch_size(),
            stride = scanner.stride(),
            dimension = index.dimension(),
            entries = index.len(),
            products = catalog.products().len(),
            "detector initialized"
        );
        Ok(Self {
            scanner,
            index,
            encoder,
            text_validator: TextValidator::new(extractor, config.detection.ocr_max_side),
            learner: AutoLearner::new(config.auto_learning.clone()),
            catalog: RwLock::new(catalog),
            detection: config.detection.clone(),
            reference_dir: config.catalog.reference_dir.clone(),
        })
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read()
    }

    pub fn learner(&self) -> &AutoLearner {
        &self.learner
    }

    pub fn learner_stats(&self) -> LearnerStats {
        self.learner.stats()
    }

    pub fn scanner(&self) -> &RegionScanner {
        &self.scanner
    }

    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    /// Detect catalog products in `image`.
    ///
    /// Never fails: stage errors are logged and skipped, and no detection is
    /// an empty list. At most one result per product, sorted by descending
    /// confidence. Auto-learning runs after the list is final.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &RgbImage, min_confidence: Option<f32>) -> Vec<DetectionResult> {
        let started = Instant::now();
        let min_confidence = min_confidence.unwrap_or(self.detection.min_confidence);

        let regions = match self.scanner.scan(image) {
            Ok(regions) => regions,
            Err(e) => {
                warn!(error = %e, "scan failed, returning no detections");
                return Vec::new();
            }
        };

        let inactive = self.inactive_products();
        let mut candidates = Vec::new();
        let mut skipped = 0usize;
        for (i, region) in regions.iter().enumerate() {
            match self.evaluate_region(region, min_confidence) {
                RegionOutcome::Matched(found) => candidates.extend(
                    found
                        .into_iter()
                        .filter(|c| !inactive.contains(&c.product_id)),
                ),
                RegionOutcome::Skipped(reason) => {
                    skipped += 1;
                    crate::metrics::REGIONS_SKIPPED_TOTAL
                        .with_label_values(&[reason.label()])
                        .inc();
                    if reason.is_failure() {
                        warn!(region = i, bbox = ?region.bbox, %reason, "region skipped");
                    } else {
                        debug!(region = i, %reason, "region skipped");
                    }
                }
            }
        }
        debug!(
            regions = regions.len(),
            skipped,
            candidates = candidates.len(),
            "regions evaluated"
        );

        let (width, height) = image.dimensions();
        let mut emitted: Vec<(DetectionResult, LearnTemplate)> = fusion::fuse(candidates)
            .into_iter()
            .map(|cluster| self.finalize(image, cluster, width, height))
            .collect();

        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;
        for (result, _) in &mut emitted {
            result.processing_ms = processing_ms;
        }
        emitted.sort_by(|(a, _), (b, _)| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        crate::metrics::DETECT_DURATION.observe(processing_ms / 1000.0);
        for (result, _) in &emitted {
            crate::metrics::DETECTIONS_TOTAL
                .with_label_values(&[&result.product_id])
                .inc();
        }
        info!(
            detections = emitted.len(),
            regions = regions.len(),
            elapsed_ms = processing_ms,
            "detection complete"
        );

        let results: Vec<DetectionResult> =
            emitted.iter().map(|(result, _)| result.clone()).collect();
        self.learn_from(image, &emitted);
        results
    }

    /// Embed one region, search the index and score every match that clears
    /// `min_confidence`.
    pub fn evaluate_region(&self, region: &Region, min_confidence: f32) -> RegionOutcome {
        let embedding = match self.encoder.encode(&region.image) {
            Ok(embedding) => embedding,
            Err(e) => return RegionOutcome::Skipped(SkipReason::EncodeFailed(e.to_string())),
        };
        let hits = match self.index.search(&embedding, self.detection.top_k) {
            Ok(hits) => hits,
            Err(e) => return RegionOutcome::Skipped(SkipReason::SearchFailed(e.to_string())),
        };
        let Some(best) = hits.first().map(|h| h.similarity) else {
            return RegionOutcome::Skipped(SkipReason::NoMatches);
        };

        let mut actual_ratio = None;
        let mut found = Vec::new();
        for hit in hits {
            if hit.similarity < min_confidence {
                continue;
            }
            let actual =
                *actual_ratio.get_or_insert_with(|| ShapeValidator::aspect_ratio(&region.image));
            let shape_valid = ShapeValidator::validate(
                actual,
                hit.shape_ratio,
                hit.metadata.validation.shape_tolerance,
            );
            found.push(Candidate {
                confidence: fusion::scaled_confidence(hit.similarity, shape_valid),
                product_id: hit.product_id,
                product_name: hit.metadata.name,
                bbox: region.bbox,
                shape_valid,
                keywords: hit.metadata.keywords,
                validation: hit.metadata.validation,
            });
        }

        if found.is_empty() {
            RegionOutcome::Skipped(SkipReason::BelowThreshold { best })
        } else {
            RegionOutcome::Matched(found)
        }
    }

    /// Clamp the winner's bbox, run text verification when gated in, and
    /// build the emitted result.
    fn finalize(
        &self,
        image: &RgbImage,
        cluster: Cluster,
        width: u32,
        height: u32,
    ) -> (DetectionResult, LearnTemplate) {
        let bbox = cluster.bbox.clamp(width, height);
        let gated = !cluster.keywords.is_empty()
            && (cluster.shape_valid || cluster.confidence > OCR_CONFIDENCE_GATE)
            && !bbox.is_empty();

        let verification = if gated {
            let crop = imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            self.text_validator.validate(&crop, &cluster.keywords)
        } else {
            TextVerification::default()
        };

        let confidence = if verification.verified {
            fusion::text_boosted(cluster.confidence)
        } else {
            cluster.confidence
        };

        let result = DetectionResult {
            product_id: cluster.product_id,
            product_name: cluster.product_name,
            confidence,
            bbox,
            text_verified: verification.verified,
            shape_valid: cluster.shape_valid,
            matched_keywords: verification.matched_keywords,
            processing_ms: 0.0,
        };
        let template = LearnTemplate {
            keywords: cluster.keywords,
            validation: cluster.validation,
        };
        (result, template)
    }

    fn learn_from(&self, image: &RgbImage, emitted: &[(DetectionResult, LearnTemplate)]) {
        for (result, template) in emitted {
            if !self.learner.should_learn(result) || result.bbox.is_empty() {
                continue;
            }
            if self.catalog.read().is_locked(&result.product_id) {
                debug!(product_id = %result.product_id, "product locked, not learning");
                continue;
            }
            let b = result.bbox;
            let patch = imageops::crop_imm(image, b.x, b.y, b.width, b.height).to_image();
            if let Err(e) = self
                .learner
                .learn(&patch, result, template, self.encoder.as_ref(), &self.index)
            {
                warn!(product_id = %result.product_id, error = %e, "auto-learning failed");
            }
        }
    }

    /// Catalog products marked inactive. Products absent from the catalog
    /// are not filtered.
    fn inactive_products(&self) -> HashSet<ProductId> {
        self.catalog
            .read()
            .products()
            .iter()
            .filter(|p| !p.active)
            .map(|p| p.id.clone())
            .collect()
    }
}
