//! Catalog mutation surface: products and their reference images, kept in
//! step with the index.

use std::path::Path;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use super::Detector;
use crate::catalog::safe_component;
use crate::error::{PrismError, Result};
use crate::types::{Product, ReferenceImage, Uid, ValidationConfig};
use crate::validators::ShapeValidator;

/// Outcome of ingesting a batch of reference images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub indexed: usize,
    pub skipped: usize,
}

/// Partial product update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub locked: Option<bool>,
    pub active: Option<bool>,
    pub keywords: Option<Vec<String>>,
    pub shape_tolerance: Option<f32>,
}

/// An indexed reference of a product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceSummary {
    pub uid: Uid,
    pub ref_id: Option<String>,
    pub shape_ratio: f32,
    pub learned: bool,
    pub added_at: DateTime<Utc>,
}

impl Detector {
    /// Index every reference of active catalog products that the index does
    /// not already hold, then trim each touched product back to the
    /// per-product reference cap.
    #[instrument(skip(self))]
    pub fn sync_catalog(&self) -> Result<IngestReport> {
        let products: Vec<Product> = self
            .catalog
            .read()
            .products()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();

        let mut report = IngestReport::default();
        let mut pruned = 0;
        for product in &products {
            let part = self.ingest_missing(product);
            report.indexed += part.indexed;
            report.skipped += part.skipped;
            if part.indexed > 0 {
                pruned += self.learner.prune(&product.id, &self.index).len();
            }
        }
        if report.indexed > 0 {
            self.index.save()?;
        }
        info!(
            products = products.len(),
            indexed = report.indexed,
            skipped = report.skipped,
            pruned,
            "catalog synced"
        );
        Ok(report)
    }

    /// Register a new product and index its reference images.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub fn add_product(&self, mut product: Product) -> Result<IngestReport> {
        product.created_at.get_or_insert_with(Utc::now);
        {
            let mut catalog = self.catalog.write();
            catalog.insert(product.clone())?;
            catalog.save()?;
        }

        let report = if product.active {
            self.ingest_missing(&product)
        } else {
            IngestReport::default()
        };
        if report.indexed > 0 {
            self.index.save()?;
        }
        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            "product added"
        );
        Ok(report)
    }

    /// Apply `update` to a product. Name, keyword and shape tolerance
    /// changes are propagated to every index entry of the product.
    #[instrument(skip(self, update))]
    pub fn update_product(&self, product_id: &str, update: ProductUpdate) -> Result<Product> {
        if matches!(&update.name, Some(name) if name.trim().is_empty()) {
            return Err(PrismError::Validation("product name must not be empty".into()));
        }
        if matches!(update.shape_tolerance, Some(t) if !t.is_finite() || t < 0.0) {
            return Err(PrismError::Validation(
                "shape_tolerance must be a finite non-negative number".into(),
            ));
        }

        let (updated, reactivated) = {
            let mut catalog = self.catalog.write();
            let product = catalog
                .get_mut(product_id)
                .ok_or_else(|| PrismError::ProductNotFound {
                    product_id: product_id.to_string(),
                })?;
            let was_active = product.active;
            if let Some(name) = &update.name {
                product.name = name.clone();
            }
            if let Some(locked) = update.locked {
                product.locked = locked;
            }
            if let Some(active) = update.active {
                product.active = active;
            }
            if let Some(keywords) = &update.keywords {
                product.keywords = keywords.clone();
            }
            if let Some(shape_tolerance) = update.shape_tolerance {
                product.validation = ValidationConfig { shape_tolerance };
            }
            let reactivated = !was_active && product.active;
            let updated = product.clone();
            catalog.save()?;
            (updated, reactivated)
        };

        let relabeled = {
            let mut index = self.index.write();
            let mut relabeled = 0;
            if update.name.is_some() || update.keywords.is_some() {
                relabeled = index.relabel_product(
                    product_id,
                    update.name.as_deref(),
                    update.keywords.as_deref(),
                );
            }
            if update.shape_tolerance.is_some() {
                let revalidated = index.set_product_validation(product_id, updated.validation);
                relabeled = relabeled.max(revalidated);
            }
            relabeled
        };
        let ingested = if reactivated {
            self.ingest_missing(&updated).indexed
        } else {
            0
        };
        if ingested > 0 {
            self.learner.prune(product_id, &self.index);
        }
        if relabeled > 0 || ingested > 0 {
            self.index.save()?;
        }
        info!(relabeled, ingested, locked = updated.locked, "product updated");
        Ok(updated)
    }

    /// Remove a product, its stored references and all its index entries.
    /// Returns the number of index entries removed.
    #[instrument(skip(self))]
    pub fn delete_product(&self, product_id: &str) -> Result<usize> {
        {
            let mut catalog = self.catalog.write();
            if catalog.require(product_id)?.locked {
                return Err(PrismError::ProductLocked {
                    product_id: product_id.to_string(),
                });
            }
            catalog.remove(product_id)?;
            catalog.save()?;
        }

        let dir = self.reference_dir.join(safe_component(product_id));
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove reference directory");
            }
        }

        let removed = self.index.write().remove_product(product_id).len();
        self.index.save()?;
        info!(removed, "product deleted");
        Ok(removed)
    }

    /// Store `image` as a new reference of `product_id` and index it.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn add_reference(
        &self,
        product_id: &str,
        image: &RgbImage,
        angle: Option<String>,
    ) -> Result<ReferenceImage> {
        let product = self.catalog.read().require(product_id)?.clone();
        if product.locked {
            return Err(PrismError::ProductLocked {
                product_id: product_id.to_string(),
            });
        }

        let ref_id = format!("ref_{}", Ulid::new().to_string().to_lowercase());
        let dir = self.reference_dir.join(safe_component(product_id));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{ref_id}.jpg"));
        image.save(&path)?;

        let uid = match self.index_reference(&product, &ref_id, image) {
            Ok(uid) => uid,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        let reference = ReferenceImage {
            id: ref_id,
            url: path.to_string_lossy().into_owned(),
            angle: angle.unwrap_or_else(|| "unknown".to_string()),
            added_at: Utc::now(),
        };
        {
            let mut catalog = self.catalog.write();
            let Some(entry) = catalog.get_mut(product_id) else {
                self.index.remove(uid);
                let _ = std::fs::remove_file(&path);
                return Err(PrismError::ProductNotFound {
                    product_id: product_id.to_string(),
                });
            };
            entry.reference_images.push(reference.clone());
            catalog.save()?;
        }
        self.index.save()?;
        info!(ref_id = %reference.id, uid, "reference added");
        Ok(reference)
    }

    /// Remove a reference by id: its file, its catalog record and its index
    /// entries. Learned references exist only in the index and are found
    /// there. Returns the number of index entries removed.
    #[instrument(skip(self))]
    pub fn remove_reference(&self, ref_id: &str) -> Result<usize> {
        let owner = {
            let catalog = self.catalog.read();
            catalog
                .find_reference(ref_id)
                .map(|(p, r)| (p.id.clone(), p.locked, r.url.clone()))
        };

        match owner {
            Some((product_id, locked, url)) => {
                if locked {
                    return Err(PrismError::ProductLocked { product_id });
                }
                remove_file_logged(Path::new(&url));
                let mut catalog = self.catalog.write();
                if let Some(product) = catalog.get_mut(&product_id) {
                    product.reference_images.retain(|r| r.id != ref_id);
                }
                catalog.save()?;
            }
            None => {
                let product_id = {
                    let index = self.index.read();
                    index
                        .uids_for_reference(ref_id)
                        .first()
                        .and_then(|uid| index.entry(*uid))
                        .map(|e| e.product_id.clone())
                };
                let Some(product_id) = product_id else {
                    return Err(PrismError::ReferenceNotFound {
                        ref_id: ref_id.to_string(),
                    });
                };
                if self.catalog.read().is_locked(&product_id) {
                    return Err(PrismError::ProductLocked { product_id });
                }
                remove_file_logged(&self.learner.patch_path(&product_id, ref_id));
            }
        }

        let removed = self.index.write().remove_reference(ref_id).len();
        if removed == 0 {
            warn!(ref_id, "reference had no index entries");
        }
        self.index.save()?;
        info!(removed, "reference removed");
        Ok(removed)
    }

    /// Drop every index entry of `product_id`, curated and learned, leaving
    /// the catalog untouched.
    #[instrument(skip(self))]
    pub fn remove_product_references(&self, product_id: &str) -> Result<usize> {
        if self.catalog.read().is_locked(product_id) {
            return Err(PrismError::ProductLocked {
                product_id: product_id.to_string(),
            });
        }
        let removed = self.index.write().remove_product(product_id).len();
        if removed > 0 {
            self.index.save()?;
        }
        info!(removed, "product references removed from index");
        Ok(removed)
    }

    /// Indexed references of a product, oldest uid first.
    pub fn references(&self, product_id: &str) -> Vec<ReferenceSummary> {
        self.index
            .read()
            .entries_for(product_id)
            .into_iter()
            .map(|e| ReferenceSummary {
                uid: e.uid,
                ref_id: e.metadata.ref_id.clone(),
                shape_ratio: e.shape_ratio,
                learned: e.metadata.learned,
                added_at: e.added_at,
            })
            .collect()
    }

    /// Index the product's references that are not in the index yet.
    /// Unreadable files are logged and counted as skipped.
    fn ingest_missing(&self, product: &Product) -> IngestReport {
        let mut report = IngestReport::default();
        for reference in &product.reference_images {
            if self.index.read().has_reference(&reference.id) {
                continue;
            }
            let indexed = image::open(&reference.url)
                .map_err(PrismError::from)
                .and_then(|img| self.prepare_reference(&img.to_rgb8()))
                .and_then(|(embedding, shape_ratio)| {
                    // Another ingest may have indexed it while this one encoded.
                    let mut index = self.index.write();
                    if index.has_reference(&reference.id) {
                        return Ok(None);
                    }
                    index
                        .add(
                            &product.id,
                            &embedding,
                            shape_ratio,
                            product.entry_metadata(&reference.id),
                        )
                        .map(Some)
                });
            match indexed {
                Ok(Some(_)) => report.indexed += 1,
                Ok(None) => debug!(ref_id = %reference.id, "reference already indexed"),
                Err(e) => {
                    warn!(
                        product_id = %product.id,
                        ref_id = %reference.id,
                        url = %reference.url,
                        error = %e,
                        "failed to index reference"
                    );
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Embedding and aspect ratio of a reference image.
    fn prepare_reference(&self, image: &RgbImage) -> Result<(Vec<f32>, f32)> {
        Ok((self.encoder.encode(image)?, ShapeValidator::aspect_ratio(image)))
    }

    fn index_reference(&self, product: &Product, ref_id: &str, image: &RgbImage) -> Result<Uid> {
        let (embedding, shape_ratio) = self.prepare_reference(image)?;
        self.index.add(
            &product.id,
            &embedding,
            shape_ratio,
            product.entry_metadata(ref_id),
        )
    }
}

fn remove_file_logged(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove reference file");
        }
    }
}
