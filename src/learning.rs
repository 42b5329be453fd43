//! Auto-learning: write confident, text-verified detections back into the
//! index as new references, capped per product.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use crate::catalog::safe_component;
use crate::config::AutoLearningConfig;
use crate::embedding::Encoder;
use crate::error::Result;
use crate::index::{IndexEntry, SharedIndex};
use crate::types::{DetectionResult, EntryMetadata, Uid, ValidationConfig};
use crate::validators::ShapeValidator;

/// Per-product fields a learned entry inherits from the detection's cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnTemplate {
    pub keywords: Vec<String>,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnOutcome {
    pub uid: Uid,
    pub ref_id: String,
    pub path: PathBuf,
    pub pruned: Vec<Uid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerStats {
    pub enabled: bool,
    pub threshold: f32,
    pub learned_count: u64,
    pub pruned_count: u64,
    pub max_references_per_product: usize,
}

pub struct AutoLearner {
    config: AutoLearningConfig,
    learned: AtomicU64,
    pruned: AtomicU64,
}

impl AutoLearner {
    pub fn new(config: AutoLearningConfig) -> Self {
        info!(
            enabled = config.enabled,
            threshold = config.threshold,
            max_refs = config.max_references_per_product,
            "auto-learner initialized"
        );
        Self {
            config,
            learned: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AutoLearningConfig {
        &self.config
    }

    /// Learning requires the feature enabled, confidence at or above the
    /// threshold, and verified text. Shape validity is not required.
    pub fn should_learn(&self, detection: &DetectionResult) -> bool {
        self.config.enabled
            && detection.confidence >= self.config.threshold
            && detection.text_verified
    }

    /// Where the patch for a learned reference is stored.
    pub fn patch_path(&self, product_id: &str, ref_id: &str) -> PathBuf {
        self.config
            .learned_dir
            .join(format!("{}_{}.jpg", safe_component(product_id), ref_id))
    }

    /// Add `patch` as a new learned reference of the detected product, save
    /// the index, then enforce the per-product cap.
    #[instrument(skip_all, fields(product_id = %detection.product_id))]
    pub fn learn(
        &self,
        patch: &RgbImage,
        detection: &DetectionResult,
        template: &LearnTemplate,
        encoder: &dyn Encoder,
        index: &SharedIndex,
    ) -> Result<LearnOutcome> {
        let embedding = encoder.encode(patch)?;
        let shape_ratio = ShapeValidator::aspect_ratio(patch);

        let ref_id = format!("auto_{}", Ulid::new().to_string().to_lowercase());
        let path = self.patch_path(&detection.product_id, &ref_id);
        std::fs::create_dir_all(&self.config.learned_dir)?;
        patch.save(&path)?;

        let metadata = EntryMetadata {
            name: detection.product_name.clone(),
            keywords: template.keywords.clone(),
            validation: template.validation,
            ref_id: Some(ref_id.clone()),
            learned: true,
            source_confidence: Some(detection.confidence),
            timestamp: Some(Utc::now().timestamp()),
        };
        let uid = match index.add(&detection.product_id, &embedding, shape_ratio, metadata) {
            Ok(uid) => uid,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        index.save_or_warn();

        self.learned.fetch_add(1, Ordering::Relaxed);
        crate::metrics::LEARNED_REFERENCES_TOTAL
            .with_label_values(&[&detection.product_id])
            .inc();
        info!(
            uid,
            ref_id = %ref_id,
            confidence = detection.confidence,
            "learned new reference"
        );

        let pruned = self.prune(&detection.product_id, index);
        if !pruned.is_empty() {
            index.save_or_warn();
        }

        Ok(LearnOutcome {
            uid,
            ref_id,
            path,
            pruned,
        })
    }

    /// Evict the oldest entries of `product_id` until at most
    /// `max_references_per_product` remain, deleting the stored patch of
    /// every evicted learned entry. Returns the evicted uids.
    pub fn prune(&self, product_id: &str, index: &SharedIndex) -> Vec<Uid> {
        let mut guard = index.write();
        let evicted = select_evictions(
            &guard.entries_for(product_id),
            self.config.max_references_per_product,
        );
        let mut patches = Vec::new();
        for &uid in &evicted {
            if let Some(ref_id) = guard
                .entry(uid)
                .filter(|e| e.metadata.learned)
                .and_then(|e| e.metadata.ref_id.as_deref())
            {
                patches.push(self.patch_path(product_id, ref_id));
            }
            guard.remove(uid);
            info!(uid, product_id, "pruned old reference");
        }
        drop(guard);

        for path in &patches {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed pruned patch"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove pruned patch")
                }
            }
        }

        if !evicted.is_empty() {
            self.pruned.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            crate::metrics::PRUNED_REFERENCES_TOTAL
                .with_label_values(&[product_id])
                .inc_by(evicted.len() as u64);
        }
        evicted
    }

    pub fn stats(&self) -> LearnerStats {
        LearnerStats {
            enabled: self.config.enabled,
            threshold: self.config.threshold,
            learned_count: self.learned.load(Ordering::Relaxed),
            pruned_count: self.pruned.load(Ordering::Relaxed),
            max_references_per_product: self.config.max_references_per_product,
        }
    }
}

/// Uids to evict so that `cap` entries remain: oldest timestamp first
/// (missing timestamps count as 0), ties in the given order.
pub fn select_evictions(entries: &[&IndexEntry], cap: usize) -> Vec<Uid> {
    if entries.len() <= cap {
        return Vec::new();
    }
    let mut ordered = entries.to_vec();
    ordered.sort_by_key(|e| e.eviction_timestamp());
    ordered
        .iter()
        .take(entries.len() - cap)
        .map(|e| e.uid)
        .collect()
}
