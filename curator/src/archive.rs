use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CurateError, Result};

#[derive(Debug, Default)]
pub struct ArchiveResult {
    pub archive_path: Option<PathBuf>,
    pub pruned: usize,
}

fn stem_and_ext(store_path: &Path) -> (String, String) {
    let stem = store_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = store_path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jsonl".to_string());
    (stem, ext)
}

fn is_archive_name(name: &str, stem: &str, ext: &str) -> bool {
    let Some(middle) = name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(ext))
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    middle.len() == 16 && middle.ends_with('Z') && middle.as_bytes()[8] == b'T'
}

/// Archived snapshots of `store_path`, oldest first.
pub fn discover_archives(store_path: &Path) -> Result<Vec<PathBuf>> {
    let Some(dir) = store_path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(Vec::new());
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let (stem, ext) = stem_and_ext(store_path);

    let mut archives = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CurateError::io("list dir", dir, e))? {
        let entry = entry.map_err(|e| CurateError::io("list dir", dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_archive_name(name, &stem, &ext) {
            archives.push(path);
        }
    }

    archives.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(archives)
}

/// Copy the current store aside before it is replaced, then prune to `keep_files`.
/// Does nothing when `keep_files` is 0 or there is no store yet.
pub fn archive_before_replace(
    store_path: &Path,
    keep_files: usize,
    now: DateTime<Utc>,
) -> Result<ArchiveResult> {
    let mut result = ArchiveResult::default();
    if keep_files == 0 || !store_path.is_file() {
        return Ok(result);
    }

    let (stem, ext) = stem_and_ext(store_path);
    let timestamp = now.format("%Y%m%dT%H%M%SZ");
    let archive_path = store_path.with_file_name(format!("{stem}.{timestamp}.{ext}"));
    fs::copy(store_path, &archive_path)
        .map_err(|e| CurateError::io("archive store to", &archive_path, e))?;
    tracing::info!(archive = %archive_path.display(), "archived previous store");
    result.archive_path = Some(archive_path);

    let mut archives = discover_archives(store_path)?;
    if archives.len() > keep_files {
        let to_prune = archives.len() - keep_files;
        archives.truncate(to_prune);
        for path in archives {
            fs::remove_file(&path).map_err(|e| CurateError::io("prune archive", &path, e))?;
            result.pruned += 1;
        }
    }

    Ok(result)
}
