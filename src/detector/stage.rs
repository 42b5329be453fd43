//! Explicit per-region outcomes of the encode/search/score stage.

use std::fmt;

use super::fusion::Candidate;

/// Result of evaluating one scanned region.
#[derive(Debug, Clone)]
pub enum RegionOutcome {
    Matched(Vec<Candidate>),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The encoder could not embed the region.
    EncodeFailed(String),
    /// The index rejected the query.
    SearchFailed(String),
    /// The index returned nothing.
    NoMatches,
    /// Every match fell below the similarity threshold.
    BelowThreshold { best: f32 },
}

impl SkipReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::EncodeFailed(_) => "encode_failed",
            SkipReason::SearchFailed(_) => "search_failed",
            SkipReason::NoMatches => "no_matches",
            SkipReason::BelowThreshold { .. } => "below_threshold",
        }
    }

    /// Failures are logged at warn level, ordinary misses at debug.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SkipReason::EncodeFailed(_) | SkipReason::SearchFailed(_)
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EncodeFailed(e) => write!(f, "encode failed: {e}"),
            SkipReason::SearchFailed(e) => write!(f, "search failed: {e}"),
            SkipReason::NoMatches => f.write_str("no matches"),
            SkipReason::BelowThreshold { best } => {
                write!(f, "best similarity {best:.3} below threshold")
            }
        }
    }
}
