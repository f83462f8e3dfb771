//! Integrity manifest for the published store.
//!
//! The manifest is derived from the store file's bytes and nothing else. It is
//! recomputed after every store write and always replaced whole.

use chrono::{DateTime, Utc};
use roster_types::Manifest;
use std::fs;
use std::path::Path;

use crate::error::{CurateError, Result};
use crate::store;

/// Descriptive fields that are not derived from the store bytes.
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub schema_version: String,
    pub sort_order: String,
    pub score_formula: String,
}

/// What the writer believes it just put on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub count: usize,
    pub sha256: String,
}

/// Recompute the manifest from the store file as it is now.
pub fn compute(store_path: &Path, info: &ManifestInfo, now: DateTime<Utc>) -> Result<Manifest> {
    Ok(Manifest {
        count: store::count_lines(store_path)?,
        sha256: store::hash(store_path)?,
        created_at: now,
        schema_version: info.schema_version.clone(),
        sort_order: info.sort_order.clone(),
        score_formula: info.score_formula.clone(),
        store: store_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
    })
}

/// Compute, cross-check, and atomically write the manifest for `store_path`.
///
/// With `expected`, any disagreement between the file and what the writer
/// rendered is an `IntegrityMismatch` and nothing is written. When the
/// store content matches the manifest already on disk, its `created_at` is
/// kept so an unchanged snapshot republishes byte-for-byte.
pub fn publish(
    store_path: &Path,
    manifest_path: &Path,
    info: &ManifestInfo,
    now: DateTime<Utc>,
    expected: Option<&Expected>,
) -> Result<Manifest> {
    let mut manifest = compute(store_path, info, now)?;

    if let Some(expected) = expected {
        check(&manifest, expected, store_path)?;
    }

    if let Ok(Some(previous)) = read(manifest_path)
        && previous.sha256 == manifest.sha256
        && previous.count == manifest.count
    {
        manifest.created_at = previous.created_at;
    }

    write(manifest_path, &manifest)?;
    Ok(manifest)
}

fn check(manifest: &Manifest, expected: &Expected, store_path: &Path) -> Result<()> {
    if manifest.count != expected.count {
        return Err(CurateError::IntegrityMismatch {
            path: store_path.to_path_buf(),
            detail: format!(
                "store has {} records, writer produced {}",
                manifest.count, expected.count
            ),
        });
    }
    if manifest.sha256 != expected.sha256 {
        return Err(CurateError::IntegrityMismatch {
            path: store_path.to_path_buf(),
            detail: format!(
                "store sha256 {} differs from written content {}",
                manifest.sha256, expected.sha256
            ),
        });
    }
    Ok(())
}

pub fn read(manifest_path: &Path) -> Result<Option<Manifest>> {
    if !manifest_path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(manifest_path)
        .map_err(|e| CurateError::io("read manifest", manifest_path, e))?;
    let manifest = serde_json::from_str(&text).map_err(|source| CurateError::MalformedRecord {
        path: manifest_path.to_path_buf(),
        line: source.line(),
        source,
    })?;
    Ok(Some(manifest))
}

pub fn write(manifest_path: &Path, manifest: &Manifest) -> Result<()> {
    let mut json = serde_json::to_string_pretty(manifest).map_err(CurateError::Serialize)?;
    json.push('\n');
    store::write_atomic(manifest_path, json.as_bytes())
}

/// Check the manifest on disk against the store it describes.
pub fn verify(store_path: &Path, manifest_path: &Path) -> Result<Manifest> {
    let manifest = read(manifest_path)?.ok_or_else(|| CurateError::IntegrityMismatch {
        path: manifest_path.to_path_buf(),
        detail: "manifest missing".to_string(),
    })?;
    let expected = Expected {
        count: manifest.count,
        sha256: manifest.sha256.clone(),
    };
    let actual = Expected {
        count: store::count_lines(store_path)?,
        sha256: store::hash(store_path)?,
    };
    if actual.count != expected.count {
        return Err(CurateError::IntegrityMismatch {
            path: store_path.to_path_buf(),
            detail: format!(
                "manifest count {} but store has {} records",
                expected.count, actual.count
            ),
        });
    }
    if actual.sha256 != expected.sha256 {
        return Err(CurateError::IntegrityMismatch {
            path: store_path.to_path_buf(),
            detail: format!(
                "manifest sha256 {} but store hashes to {}",
                expected.sha256, actual.sha256
            ),
        });
    }
    Ok(manifest)
}
