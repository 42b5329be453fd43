//! Two-artifact persistence for `ProductIndex`.
//!
//! `<base>.<generation>.vectors` holds the raw vector rows (bincode) and
//! `<base>.meta.json` holds the `{uid -> entry}` map, the `next_id` counter
//! and the name and checksum of the vector file it was written with.
//!
//! A save writes a fresh vector generation next to the current one, then
//! renames the metadata file into place. That rename is the only commit
//! point: until it happens the previous metadata still names the previous
//! generation, which is left untouched. Superseded generations are removed
//! after the commit.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{PrismError, Result};
use crate::types::Uid;

use super::flat::{IndexEntry, ProductIndex};

const VECTORS_SUFFIX: &str = ".vectors";
const META_SUFFIX: &str = ".meta.json";

#[derive(Serialize)]
struct VectorSnapshotRef<'a> {
    dimension: usize,
    ids: &'a [Uid],
    data: &'a [f32],
    checksum: u64,
}

#[derive(Debug, Deserialize)]
struct VectorSnapshot {
    dimension: usize,
    ids: Vec<Uid>,
    data: Vec<f32>,
    checksum: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaSnapshot {
    next_id: Uid,
    entries: BTreeMap<Uid, IndexEntry>,
    /// File name (not path) of the vector generation, relative to the
    /// metadata file's directory.
    vectors_file: String,
    vectors_checksum: u64,
    saved_at: DateTime<Utc>,
}

fn compute_checksum(dimension: usize, ids: &[Uid], data: &[f32]) -> Result<u64> {
    let payload = bincode::serialize(&(dimension, ids, data))?;
    Ok(xxh3_64(&payload))
}

impl VectorSnapshot {
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let snapshot: Self = bincode::deserialize(data)?;
        let expected = compute_checksum(snapshot.dimension, &snapshot.ids, &snapshot.data)?;
        if snapshot.checksum != expected {
            return Err(PrismError::ChecksumMismatch {
                expected,
                actual: snapshot.checksum,
            });
        }
        Ok(snapshot)
    }
}

/// Path of vector generation `generation` for `base`.
pub fn vectors_path(base: &Path, generation: &str) -> PathBuf {
    with_suffix(base, &format!(".{generation}{VECTORS_SUFFIX}"))
}

/// Path of the metadata artifact for `base`. Its presence marks a committed save.
pub fn meta_path(base: &Path) -> PathBuf {
    with_suffix(base, META_SUFFIX)
}

/// The vector file named by the committed metadata, if there is one.
pub fn committed_vectors_path(base: &Path) -> Result<Option<PathBuf>> {
    let mpath = meta_path(base);
    if !mpath.exists() {
        return Ok(None);
    }
    let meta: MetaSnapshot = serde_json::from_slice(&std::fs::read(&mpath)?)?;
    Ok(Some(parent_dir(base).join(meta.vectors_file)))
}

/// Every vector generation present on disk for `base`, committed or not.
pub fn vector_generations(base: &Path) -> Result<Vec<PathBuf>> {
    let dir = parent_dir(base);
    let Some(stem) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let prefix = format!("{stem}.");
    let mut found = Vec::new();
    for dirent in std::fs::read_dir(&dir)? {
        let path = dirent?.path();
        let is_generation = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(VECTORS_SUFFIX));
        if is_generation {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(base: &Path) -> PathBuf {
    match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Write both artifacts for `index`.
///
/// The vector generation is written and synced under a new name first; the
/// metadata rename then commits it. A failure or crash at any point before
/// that rename leaves the previously committed pair readable.
#[instrument(skip(index, base), fields(base = %base.display(), entries = index.len()))]
pub fn save(index: &ProductIndex, base: &Path) -> Result<()> {
    let checksum = compute_checksum(index.dimension(), index.raw_ids(), index.raw_data())?;
    let vpath = vectors_path(base, &Ulid::new().to_string().to_lowercase());
    let vectors_file = vpath
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            PrismError::Internal(format!("index base path has no file name: {}", base.display()))
        })?;

    let vectors = Bytes::from(bincode::serialize(&VectorSnapshotRef {
        dimension: index.dimension(),
        ids: index.raw_ids(),
        data: index.raw_data(),
        checksum,
    })?);

    let meta = Bytes::from(serde_json::to_vec(&MetaSnapshot {
        next_id: index.next_id(),
        entries: index.raw_entries().clone(),
        vectors_file,
        vectors_checksum: checksum,
        saved_at: Utc::now(),
    })?);

    let dir = parent_dir(base);
    std::fs::create_dir_all(&dir)?;

    write_temp(&dir, &vectors)?.persist(&vpath)?;
    let committed = write_temp(&dir, &meta).and_then(|tmp| {
        tmp.persist(meta_path(base))?;
        Ok(())
    });
    if let Err(e) = committed {
        remove_generation(&vpath);
        return Err(e);
    }

    for stale in vector_generations(base)?
        .into_iter()
        .filter(|p| p.file_name() != vpath.file_name())
    {
        remove_generation(&stale);
    }

    debug!(
        vector_bytes = vectors.len(),
        meta_bytes = meta.len(),
        "wrote index snapshot"
    );
    Ok(())
}

fn remove_generation(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove vector generation");
    }
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Read the committed pair for `base`.
///
/// Returns `Ok(None)` when nothing was ever saved. Vector generations with
/// no metadata, metadata naming a missing generation, or a pair that does
/// not belong together are `IndexCorrupted`.
#[instrument(skip(base), fields(base = %base.display()))]
pub fn restore(base: &Path, dimension: usize) -> Result<Option<ProductIndex>> {
    let mpath = meta_path(base);
    if !mpath.exists() {
        let orphans = vector_generations(base)?;
        return match orphans.first() {
            None => Ok(None),
            Some(orphan) => Err(PrismError::IndexCorrupted(format!(
                "{} exists without {}",
                orphan.display(),
                mpath.display()
            ))),
        };
    }

    let meta: MetaSnapshot = serde_json::from_slice(&std::fs::read(&mpath)?)?;
    let vpath = parent_dir(base).join(&meta.vectors_file);
    if !vpath.exists() {
        return Err(PrismError::IndexCorrupted(format!(
            "{} names missing vector file {}",
            mpath.display(),
            vpath.display()
        )));
    }
    let vectors = VectorSnapshot::from_bytes(&std::fs::read(&vpath)?)?;

    if meta.vectors_checksum != vectors.checksum {
        return Err(PrismError::IndexCorrupted(
            "vector and metadata artifacts come from different saves".into(),
        ));
    }
    if vectors.dimension != dimension {
        return Err(PrismError::DimensionMismatch {
            expected: dimension,
            actual: vectors.dimension,
        });
    }

    let index = ProductIndex::from_parts(
        vectors.dimension,
        vectors.ids,
        vectors.data,
        meta.entries,
        meta.next_id,
    )?;

    info!(
        entries = index.len(),
        next_id = index.next_id(),
        saved_at = %meta.saved_at,
        "restored index snapshot"
    );
    Ok(Some(index))
}
