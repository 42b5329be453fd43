//! Exact inner-product index over unit-normalized embeddings.
//!
//! Vectors live in one row-major buffer; each row is addressed by a stable
//! `Uid` that doubles as the join key into the metadata map. Search is an
//! exhaustive scan, so there is no training step and results are exact.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PrismError, Result};
use crate::types::{EntryMetadata, ProductId, Uid, ValidationConfig};

use super::distance::{inner_product, l2_norm};

/// Name reported in `IndexStats::index_type`.
pub const INDEX_TYPE: &str = "FlatIP";

/// Maximum deviation from unit norm accepted by `add` and `search`.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// Metadata record stored for every embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub uid: Uid,
    pub product_id: ProductId,
    pub shape_ratio: f32,
    pub metadata: EntryMetadata,
    pub added_at: DateTime<Utc>,
}

impl IndexEntry {
    /// Timestamp used for eviction ordering. Entries without one sort first.
    pub fn eviction_timestamp(&self) -> i64 {
        self.metadata.timestamp.unwrap_or(0)
    }
}

/// One search match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub product_id: ProductId,
    pub similarity: f32,
    pub metadata: EntryMetadata,
    pub shape_ratio: f32,
    pub index_id: Uid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_embeddings: usize,
    pub unique_products: usize,
    pub dimension: usize,
    pub index_type: String,
}

#[derive(Debug, Clone)]
pub struct ProductIndex {
    dimension: usize,
    /// Row -> uid.
    ids: Vec<Uid>,
    /// Row-major vectors, `ids.len() * dimension` floats.
    data: Vec<f32>,
    /// Uid -> row.
    rows: HashMap<Uid, usize>,
    entries: BTreeMap<Uid, IndexEntry>,
    next_id: Uid,
}

impl ProductIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
            rows: HashMap::new(),
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Rebuild an index from persisted parts, checking that vectors and
    /// metadata describe exactly the same set of uids.
    pub(crate) fn from_parts(
        dimension: usize,
        ids: Vec<Uid>,
        data: Vec<f32>,
        entries: BTreeMap<Uid, IndexEntry>,
        next_id: Uid,
    ) -> Result<Self> {
        if data.len() != ids.len() * dimension {
            return Err(PrismError::IndexCorrupted(format!(
                "vector buffer holds {} floats, expected {} x {}",
                data.len(),
                ids.len(),
                dimension
            )));
        }

        let mut rows = HashMap::with_capacity(ids.len());
        for (row, &uid) in ids.iter().enumerate() {
            if rows.insert(uid, row).is_some() {
                return Err(PrismError::IndexCorrupted(format!("duplicate uid {uid}")));
            }
        }

        let vector_ids: BTreeSet<Uid> = ids.iter().copied().collect();
        let meta_ids: BTreeSet<Uid> = entries.keys().copied().collect();
        if vector_ids != meta_ids {
            return Err(PrismError::IndexCorrupted(format!(
                "vector ids and metadata ids differ ({} vs {} entries)",
                vector_ids.len(),
                meta_ids.len()
            )));
        }
        if let Some((key, entry)) = entries.iter().find(|(k, e)| **k != e.uid) {
            return Err(PrismError::IndexCorrupted(format!(
                "metadata key {key} holds entry for uid {}",
                entry.uid
            )));
        }
        if let Some(&max) = vector_ids.iter().next_back() {
            if next_id <= max {
                return Err(PrismError::IndexCorrupted(format!(
                    "next_id {next_id} is not above highest uid {max}"
                )));
            }
        }

        Ok(Self {
            dimension,
            ids,
            data,
            rows,
            entries,
            next_id,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored embeddings.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The uid the next `add` will assign.
    pub fn next_id(&self) -> Uid {
        self.next_id
    }

    /// Store an embedding and its metadata under a fresh uid.
    ///
    /// The embedding must have the configured dimension and unit norm (within
    /// `NORM_TOLERANCE`); it is renormalized before storage.
    pub fn add(
        &mut self,
        product_id: &str,
        embedding: &[f32],
        shape_ratio: f32,
        metadata: EntryMetadata,
    ) -> Result<Uid> {
        let vector = self.checked_unit_vector(embedding)?;

        let uid = self.next_id;
        self.next_id += 1;

        let row = self.ids.len();
        self.ids.push(uid);
        self.data.extend_from_slice(&vector);
        self.rows.insert(uid, row);
        self.entries.insert(
            uid,
            IndexEntry {
                uid,
                product_id: product_id.to_string(),
                shape_ratio,
                metadata,
                added_at: Utc::now(),
            },
        );

        debug!(uid, product_id, "added embedding to index");
        Ok(uid)
    }

    /// Return up to `k` matches ordered by descending similarity.
    ///
    /// `k` is clamped to the index size; an empty index yields no matches.
    /// Equal similarities are ordered by ascending uid.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_query(query)?;

        let k = k.min(self.len());
        let mut scored: Vec<(f32, usize)> = (0..self.len())
            .map(|row| (inner_product(query, self.row(row)), row))
            .collect();

        let ids = &self.ids;
        let by_rank = |a: &(f32, usize), b: &(f32, usize)| {
            b.0.total_cmp(&a.0).then_with(|| ids[a.1].cmp(&ids[b.1]))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_by(by_rank);

        let hits = scored
            .into_iter()
            .filter_map(|(similarity, row)| {
                let entry = self.entries.get(&self.ids[row])?;
                Some(SearchHit {
                    product_id: entry.product_id.clone(),
                    similarity,
                    metadata: entry.metadata.clone(),
                    shape_ratio: entry.shape_ratio,
                    index_id: entry.uid,
                })
            })
            .collect();
        Ok(hits)
    }

    /// Remove an embedding and its metadata. Returns `false` for unknown uids.
    pub fn remove(&mut self, uid: Uid) -> bool {
        let Some(row) = self.rows.remove(&uid) else {
            warn!(uid, "remove requested for unknown uid");
            return false;
        };
        self.entries.remove(&uid);

        let d = self.dimension;
        let last = self.ids.len() - 1;
        if row != last {
            let moved = self.ids[last];
            self.ids[row] = moved;
            self.data.copy_within(last * d..(last + 1) * d, row * d);
            self.rows.insert(moved, row);
        }
        self.ids.pop();
        self.data.truncate(last * d);

        debug!(uid, "removed embedding from index");
        true
    }

    /// Remove every entry of a product, returning the removed uids.
    pub fn remove_product(&mut self, product_id: &str) -> Vec<Uid> {
        let uids: Vec<Uid> = self
            .entries_for(product_id)
            .iter()
            .map(|e| e.uid)
            .collect();
        for &uid in &uids {
            self.remove(uid);
        }
        uids
    }

    /// Remove every entry created from reference `ref_id`.
    pub fn remove_reference(&mut self, ref_id: &str) -> Vec<Uid> {
        let uids = self.uids_for_reference(ref_id);
        for &uid in &uids {
            self.remove(uid);
        }
        uids
    }

    /// Rewrite the name and/or keyword snapshot of all entries of a product.
    pub fn relabel_product(
        &mut self,
        product_id: &str,
        name: Option<&str>,
        keywords: Option<&[String]>,
    ) -> usize {
        let mut updated = 0;
        for entry in self.entries.values_mut() {
            if entry.product_id != product_id {
                continue;
            }
            if let Some(name) = name {
                entry.metadata.name = name.to_string();
            }
            if let Some(keywords) = keywords {
                entry.metadata.keywords = keywords.to_vec();
            }
            updated += 1;
        }
        updated
    }

    /// Replace the validation snapshot of every entry of `product_id`.
    pub fn set_product_validation(
        &mut self,
        product_id: &str,
        validation: ValidationConfig,
    ) -> usize {
        let mut updated = 0;
        for entry in self.entries.values_mut().filter(|e| e.product_id == product_id) {
            entry.metadata.validation = validation;
            updated += 1;
        }
        updated
    }

    pub fn entry(&self, uid: Uid) -> Option<&IndexEntry> {
        self.entries.get(&uid)
    }

    /// The stored (unit) vector for `uid`.
    pub fn vector(&self, uid: Uid) -> Option<&[f32]> {
        self.rows.get(&uid).map(|&row| self.row(row))
    }

    /// All entries in ascending uid order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Entries of one product in ascending uid order.
    pub fn entries_for(&self, product_id: &str) -> Vec<&IndexEntry> {
        self.entries
            .values()
            .filter(|e| e.product_id == product_id)
            .collect()
    }

    pub fn uids_for_reference(&self, ref_id: &str) -> Vec<Uid> {
        self.entries
            .values()
            .filter(|e| e.metadata.ref_id.as_deref() == Some(ref_id))
            .map(|e| e.uid)
            .collect()
    }

    pub fn has_reference(&self, ref_id: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.metadata.ref_id.as_deref() == Some(ref_id))
    }

    /// Number of entries per product.
    pub fn product_counts(&self) -> BTreeMap<ProductId, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.product_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_embeddings: self.len(),
            unique_products: self.product_counts().len(),
            dimension: self.dimension,
            index_type: INDEX_TYPE.to_string(),
        }
    }

    pub(crate) fn raw_ids(&self) -> &[Uid] {
        &self.ids
    }

    pub(crate) fn raw_data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn raw_entries(&self) -> &BTreeMap<Uid, IndexEntry> {
        &self.entries
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dimension..(row + 1) * self.dimension]
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.dimension {
            return Err(PrismError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let norm = l2_norm(query);
        if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(PrismError::NotNormalized { norm });
        }
        Ok(())
    }

    fn checked_unit_vector(&self, embedding: &[f32]) -> Result<Vec<f32>> {
        self.check_query(embedding)?;
        let norm = embedding
            .iter()
            .map(|&x| (x as f64) * (x as f64))
            .sum::<f64>()
            .sqrt();
        Ok(embedding.iter().map(|&x| (x as f64 / norm) as f32).collect())
    }
}
