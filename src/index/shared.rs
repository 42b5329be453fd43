use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, instrument, warn};

use crate::config::{IndexConfig, RestorePolicy};
use crate::error::Result;
use crate::types::{EntryMetadata, Uid};

use super::flat::{IndexStats, ProductIndex, SearchHit};
use super::snapshot;

/// Owning handle to the process-wide index.
///
/// Searches share a read lock. Adds, removes and relabels take the write
/// lock. `save` holds an upgradable read lock for the whole snapshot, which
/// admits concurrent searches but excludes writers and other saves.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<ProductIndex>>,
    path: Option<PathBuf>,
}

impl SharedIndex {
    pub fn new(index: ProductIndex, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
            path,
        }
    }

    /// An index that is never persisted; `save` is a no-op.
    pub fn in_memory(dimension: usize) -> Self {
        Self::new(ProductIndex::new(dimension), None)
    }

    /// Restore the index from `config.path`, applying the restore policy on failure.
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: &IndexConfig) -> Result<Self> {
        let index = match snapshot::restore(&config.path, config.dimension) {
            Ok(Some(index)) => index,
            Ok(None) => {
                info!(dimension = config.dimension, "no persisted index, starting empty");
                ProductIndex::new(config.dimension)
            }
            Err(e) => match config.restore_policy {
                RestorePolicy::Empty => {
                    error!(error = %e, "failed to restore index, starting empty");
                    ProductIndex::new(config.dimension)
                }
                RestorePolicy::Fail => return Err(e),
            },
        };
        Ok(Self::new(index, Some(config.path.clone())))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ProductIndex> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ProductIndex> {
        self.inner.write()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn dimension(&self) -> usize {
        self.inner.read().dimension()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn add(
        &self,
        product_id: &str,
        embedding: &[f32],
        shape_ratio: f32,
        metadata: EntryMetadata,
    ) -> Result<Uid> {
        self.inner
            .write()
            .add(product_id, embedding, shape_ratio, metadata)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.inner.read().search(query, k)
    }

    pub fn remove(&self, uid: Uid) -> bool {
        self.inner.write().remove(uid)
    }

    pub fn stats(&self) -> IndexStats {
        self.inner.read().stats()
    }

    /// Persist a consistent snapshot. On failure the in-memory index stays
    /// authoritative and the call may be retried.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let guard = self.inner.upgradable_read();
        match snapshot::save(&guard, path) {
            Ok(()) => {
                crate::metrics::INDEX_SAVES_TOTAL
                    .with_label_values(&["ok"])
                    .inc();
                info!(entries = guard.len(), "index saved");
                Ok(())
            }
            Err(e) => {
                crate::metrics::INDEX_SAVES_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                error!(error = %e, "failed to save index");
                Err(e)
            }
        }
    }

    /// `save`, logging instead of returning the error.
    pub fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "index remains unsaved; in-memory state is authoritative");
        }
    }
}
