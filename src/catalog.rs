//! Product catalog persisted as a JSON document.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{PrismError, Result};
use crate::types::{Product, ReferenceImage};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    products: Vec<Product>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    path: Option<PathBuf>,
    products: Vec<Product>,
}

impl Catalog {
    /// A catalog that is never written to disk.
    pub fn in_memory(products: Vec<Product>) -> Self {
        Self {
            path: None,
            products,
        }
    }

    /// Load the catalog at `path`. A missing file yields an empty catalog
    /// that will be created on the first save.
    pub fn load(path: &Path) -> Result<Self> {
        let products = if path.exists() {
            let raw = std::fs::read(path)?;
            let file: CatalogFile = serde_json::from_slice(&raw)?;
            file.products
        } else {
            debug!(path = %path.display(), "catalog file not found, starting empty");
            Vec::new()
        };
        info!(products = products.len(), path = %path.display(), "loaded catalog");
        Ok(Self {
            path: Some(path.to_path_buf()),
            products,
        })
    }

    /// Atomically rewrite the catalog file.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let body = serde_json::to_vec_pretty(&CatalogFile {
            products: self.products.clone(),
        })?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        debug!(products = self.products.len(), "saved catalog");
        Ok(())
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn get(&self, product_id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn get_mut(&mut self, product_id: &str) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| p.id == product_id)
    }

    pub fn require(&self, product_id: &str) -> Result<&Product> {
        self.get(product_id)
            .ok_or_else(|| PrismError::ProductNotFound {
                product_id: product_id.to_string(),
            })
    }

    pub fn is_locked(&self, product_id: &str) -> bool {
        self.get(product_id).is_some_and(|p| p.locked)
    }

    pub fn insert(&mut self, product: Product) -> Result<()> {
        if product.id.trim().is_empty() || product.name.trim().is_empty() {
            return Err(PrismError::Validation(
                "product id and name must not be empty".into(),
            ));
        }
        if self.get(&product.id).is_some() {
            return Err(PrismError::ProductAlreadyExists {
                product_id: product.id,
            });
        }
        self.products.push(product);
        Ok(())
    }

    pub fn remove(&mut self, product_id: &str) -> Result<Product> {
        let pos = self
            .products
            .iter()
            .position(|p| p.id == product_id)
            .ok_or_else(|| PrismError::ProductNotFound {
                product_id: product_id.to_string(),
            })?;
        Ok(self.products.remove(pos))
    }

    /// The product owning reference `ref_id`, and the reference itself.
    pub fn find_reference(&self, ref_id: &str) -> Option<(&Product, &ReferenceImage)> {
        self.products.iter().find_map(|p| {
            p.reference_images
                .iter()
                .find(|r| r.id == ref_id)
                .map(|r| (p, r))
        })
    }
}

/// Encode `s` as a single path component.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. `%` itself is escaped, so distinct inputs never share an output.
pub fn safe_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
