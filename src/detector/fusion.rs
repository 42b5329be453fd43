//! Candidate scoring, overlap clustering and per-product election.
//!
//! Clusters live in a plain `Vec` and are addressed by position; growing or
//! merging a cluster is a value update on its record.

use std::collections::BTreeMap;

use crate::types::{BoundingBox, ProductId, ValidationConfig};

/// Multiplier mapping encoder similarity onto the confidence scale.
pub const CONFIDENCE_CALIBRATION: f32 = 1.18;
pub const SHAPE_BONUS: f32 = 0.02;
pub const TEXT_BONUS: f32 = 0.05;
/// Winners above this confidence are text-checked even when shape fails.
pub const OCR_CONFIDENCE_GATE: f32 = 0.9;

/// `min(1, similarity * 1.18)`, plus the shape bonus (capped at 1).
pub fn scaled_confidence(similarity: f32, shape_valid: bool) -> f32 {
    let confidence = (similarity * CONFIDENCE_CALIBRATION).min(1.0);
    if shape_valid {
        (confidence + SHAPE_BONUS).min(1.0)
    } else {
        confidence
    }
}

/// Confidence after a successful keyword match.
pub fn text_boosted(confidence: f32) -> f32 {
    (confidence + TEXT_BONUS).min(1.0)
}

/// One index match that survived the similarity threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub product_id: ProductId,
    pub product_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub shape_valid: bool,
    pub keywords: Vec<String>,
    pub validation: ValidationConfig,
}

/// Merged region of overlapping same-product candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub product_id: ProductId,
    pub product_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub shape_valid: bool,
    pub keywords: Vec<String>,
    pub validation: ValidationConfig,
    pub members: usize,
}

impl Cluster {
    fn seed(candidate: &Candidate) -> Self {
        Self {
            product_id: candidate.product_id.clone(),
            product_name: candidate.product_name.clone(),
            confidence: candidate.confidence,
            bbox: candidate.bbox,
            shape_valid: candidate.shape_valid,
            keywords: candidate.keywords.clone(),
            validation: candidate.validation,
            members: 1,
        }
    }

    /// Fold `other` into this cluster: union bbox, max confidence. The
    /// descriptive fields follow whichever side holds the max.
    fn absorb(&mut self, other: Cluster) {
        self.bbox = self.bbox.union(&other.bbox);
        self.members += other.members;
        for keyword in &other.keywords {
            if !self.keywords.contains(keyword) {
                self.keywords.push(keyword.clone());
            }
        }
        if other.confidence > self.confidence {
            self.confidence = other.confidence;
            self.product_name = other.product_name;
            self.shape_valid = other.shape_valid;
            self.validation = other.validation;
        }
    }
}

/// Cluster one product's candidates by bbox overlap.
///
/// A candidate joins the first cluster it overlaps (any positive-area
/// intersection) or seeds a new one. Clusters whose grown boxes come to
/// overlap are then merged until no two overlap, so a transitively
/// overlapping group always ends as a single cluster whatever the input order.
pub fn cluster_candidates<'a, I>(candidates: I) -> Vec<Cluster>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    let mut clusters: Vec<Cluster> = Vec::new();
    for candidate in candidates {
        match clusters
            .iter()
            .position(|c| c.bbox.intersects(&candidate.bbox))
        {
            Some(i) => clusters[i].absorb(Cluster::seed(candidate)),
            None => clusters.push(Cluster::seed(candidate)),
        }
    }
    coalesce(&mut clusters);
    clusters
}

fn coalesce(clusters: &mut Vec<Cluster>) {
    while let Some((i, j)) = first_overlapping_pair(clusters) {
        let other = clusters.remove(j);
        clusters[i].absorb(other);
    }
}

fn first_overlapping_pair(clusters: &[Cluster]) -> Option<(usize, usize)> {
    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            if clusters[i].bbox.intersects(&clusters[j].bbox) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Highest-confidence cluster; the earliest wins ties.
pub fn elect(clusters: Vec<Cluster>) -> Option<Cluster> {
    clusters.into_iter().fold(None, |best, cluster| match best {
        Some(b) if b.confidence >= cluster.confidence => Some(b),
        _ => Some(cluster),
    })
}

/// Group candidates by product, cluster each group and keep one winner per
/// product. Winners are returned in product id order.
pub fn fuse(candidates: Vec<Candidate>) -> Vec<Cluster> {
    let mut by_product: BTreeMap<ProductId, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        by_product
            .entry(candidate.product_id.clone())
            .or_default()
            .push(candidate);
    }
    by_product
        .into_values()
        .filter_map(|group| elect(cluster_candidates(&group)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, confidence: f32, bbox: BoundingBox) -> Candidate {
        Candidate {
            product_id: id.to_string(),
            product_name: id.to_uppercase(),
            confidence,
            bbox,
            shape_valid: false,
            keywords: vec![],
            validation: ValidationConfig::default(),
        }
    }

    #[test]
    fn test_touching_edges_do_not_merge() {
        let a = candidate("p", 0.8, BoundingBox::new(0, 0, 10, 10));
        let b = candidate("p", 0.9, BoundingBox::new(10, 0, 10, 10));
        assert_eq!(cluster_candidates([&a, &b]).len(), 2);
    }

    #[test]
    fn test_bridge_candidate_coalesces_clusters() {
        let a = candidate("p", 0.8, BoundingBox::new(0, 0, 10, 10));
        let c = candidate("p", 0.7, BoundingBox::new(20, 0, 10, 10));
        let bridge = candidate("p", 0.9, BoundingBox::new(5, 0, 20, 10));
        let clusters = cluster_candidates([&a, &c, &bridge]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].bbox, BoundingBox::new(0, 0, 30, 10));
        assert_eq!(clusters[0].members, 3);
    }
}
