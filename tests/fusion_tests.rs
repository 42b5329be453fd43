use assert_approx_eq::assert_approx_eq;
use proptest::prelude::*;

use prism::detector::fusion::{
    cluster_candidates, elect, fuse, scaled_confidence, text_boosted, Candidate,
};
use prism::types::{BoundingBox, ValidationConfig};

fn candidate(product: &str, confidence: f32, bbox: BoundingBox) -> Candidate {
    Candidate {
        product_id: product.to_string(),
        product_name: format!("{product} name"),
        confidence,
        bbox,
        shape_valid: false,
        keywords: vec![],
        validation: ValidationConfig::default(),
    }
}

// ─── Scoring ───

#[test]
fn test_scaled_confidence_with_shape_bonus() {
    assert_approx_eq!(scaled_confidence(0.70, true), 0.846, 1e-5);
    assert_approx_eq!(scaled_confidence(0.70, false), 0.826, 1e-5);
}

#[test]
fn test_scaled_confidence_caps_at_one() {
    assert_eq!(scaled_confidence(0.9, false), 1.0);
    assert_eq!(scaled_confidence(0.9, true), 1.0);
    assert_eq!(text_boosted(0.98), 1.0);
    assert_approx_eq!(text_boosted(0.846), 0.896, 1e-5);
}

// ─── Clustering ───

#[test]
fn test_overlapping_candidates_merge() {
    let a = candidate("p", 0.80, BoundingBox::new(0, 0, 100, 100));
    let b = candidate("p", 0.90, BoundingBox::new(50, 50, 100, 100));
    let clusters = cluster_candidates([&a, &b]);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].bbox, BoundingBox::new(0, 0, 150, 150));
    assert_eq!(clusters[0].confidence, 0.90);
    assert_eq!(clusters[0].members, 2);
}

#[test]
fn test_disjoint_candidates_stay_apart() {
    let a = candidate("p", 0.80, BoundingBox::new(0, 0, 100, 100));
    let b = candidate("p", 0.90, BoundingBox::new(200, 0, 100, 100));
    let clusters = cluster_candidates([&a, &b]);
    assert_eq!(clusters.len(), 2);

    let winner = elect(clusters).unwrap();
    assert_eq!(winner.bbox, BoundingBox::new(200, 0, 100, 100));
}

#[test]
fn test_any_positive_overlap_merges() {
    // One pixel of overlap is enough: no IoU threshold.
    let a = candidate("p", 0.80, BoundingBox::new(0, 0, 100, 100));
    let b = candidate("p", 0.70, BoundingBox::new(99, 99, 100, 100));
    assert_eq!(cluster_candidates([&a, &b]).len(), 1);
}

#[test]
fn test_cluster_fields_follow_max_member() {
    let mut a = candidate("p", 0.80, BoundingBox::new(0, 0, 100, 100));
    a.shape_valid = true;
    a.keywords = vec!["alpha".into()];
    let mut b = candidate("p", 0.95, BoundingBox::new(10, 10, 100, 100));
    b.keywords = vec!["beta".into(), "alpha".into()];

    let cluster = &cluster_candidates([&a, &b])[0];
    assert!(!cluster.shape_valid);
    assert_eq!(cluster.keywords, vec!["alpha".to_string(), "beta".to_string()]);
}

#[test]
fn test_elect_empty() {
    assert!(elect(vec![]).is_none());
}

// ─── Fusion ───

#[test]
fn test_fuse_one_winner_per_product() {
    let candidates = vec![
        candidate("a", 0.80, BoundingBox::new(0, 0, 50, 50)),
        candidate("a", 0.85, BoundingBox::new(300, 300, 50, 50)),
        candidate("b", 0.90, BoundingBox::new(0, 0, 50, 50)),
        candidate("a", 0.99, BoundingBox::new(320, 320, 50, 50)),
    ];
    let winners = fuse(candidates);
    assert_eq!(winners.len(), 2);
    assert_eq!(winners[0].product_id, "a");
    assert_eq!(winners[0].confidence, 0.99);
    assert_eq!(winners[0].bbox, BoundingBox::new(300, 300, 70, 70));
    assert_eq!(winners[1].product_id, "b");
}

#[test]
fn test_fuse_nothing() {
    assert!(fuse(vec![]).is_empty());
}

proptest! {
    #[test]
    fn prop_transitive_group_is_order_independent(
        (confidences, order) in (2usize..12).prop_flat_map(|n| (
            prop::collection::vec(0.0f32..1.0, n),
            Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
        ))
    ) {
        // A chain: each box overlaps only its neighbours.
        let n = confidences.len();
        let chain: Vec<Candidate> = (0..n)
            .map(|i| candidate("p", confidences[i], BoundingBox::new(i as u32 * 10, 0, 15, 10)))
            .collect();
        let shuffled: Vec<&Candidate> = order.iter().map(|&i| &chain[i]).collect();

        let clusters = cluster_candidates(shuffled);
        prop_assert_eq!(clusters.len(), 1);
        prop_assert_eq!(clusters[0].bbox, BoundingBox::new(0, 0, (n as u32 - 1) * 10 + 15, 10));
        let max = confidences.iter().cloned().fold(f32::MIN, f32::max);
        prop_assert_eq!(clusters[0].confidence, max);
        prop_assert_eq!(clusters[0].members, n);
    }
}
