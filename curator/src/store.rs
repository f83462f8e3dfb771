//! Newline-delimited record store: load, atomic rewrite, and content hashing.

use roster_types::Record;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CurateError, Result};
use crate::migrate::{self, Fixup};

const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// What to do with a line that cannot be turned into a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMalformed {
    /// Log the line number, count it, keep going.
    #[default]
    Skip,
    /// Fail the whole load on the first bad line.
    Abort,
}

#[derive(Debug, Default)]
pub struct Loaded {
    pub records: Vec<Record>,
    pub malformed: usize,
    pub schema_violations: usize,
    /// Lines that needed at least one declared fix-up.
    pub migrated: usize,
}

/// Read a store, skipping blank lines. A missing file loads as empty.
pub fn load(path: &Path, on_malformed: OnMalformed) -> Result<Loaded> {
    let mut loaded = Loaded::default();
    if !path.exists() {
        return Ok(loaded);
    }
    let file = File::open(path).map_err(|e| CurateError::io("open store", path, e))?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| CurateError::io("read store", path, e))?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(path, line_no, &line) {
            Ok((record, fixups)) => {
                if !fixups.is_empty() {
                    loaded.migrated += 1;
                    for fixup in &fixups {
                        tracing::warn!(path = %path.display(), line = line_no, fixup = %fixup, "applied schema fix-up");
                    }
                }
                loaded.records.push(record);
            }
            Err(err) if on_malformed == OnMalformed::Skip => {
                match err {
                    CurateError::MalformedRecord { .. } => loaded.malformed += 1,
                    _ => loaded.schema_violations += 1,
                }
                tracing::warn!(path = %path.display(), line = line_no, error = %err, "skipping bad store line");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(loaded)
}

fn parse_line(path: &Path, line_no: usize, line: &str) -> Result<(Record, Vec<Fixup>)> {
    let mut value: serde_json::Value =
        serde_json::from_str(line).map_err(|source| CurateError::MalformedRecord {
            path: path.to_path_buf(),
            line: line_no,
            source,
        })?;

    let fixups = migrate::upgrade_value(&mut value);
    let violation = |reason: String| CurateError::SchemaViolation {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };
    roster_types::validate_record_value(&value).map_err(|e| violation(format!("{e:#}")))?;
    let record = serde_json::from_value(value).map_err(|e| violation(e.to_string()))?;
    Ok((record, fixups))
}

/// Exact bytes of `path`, or `None` when it does not exist yet.
pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CurateError::io("read store", path, e)),
    }
}

/// Serialize `records` one per line, in order, into bytes exactly as they land on disk.
pub fn render<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record).map_err(CurateError::Serialize)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Atomically replace `path` with `records`, one JSON object per line.
pub fn write(path: &Path, records: &[Record]) -> Result<()> {
    let bytes = render(records)?;
    write_atomic(path, &bytes)
}

/// Write to a sibling temp file, fsync, then rename over `path`.
/// Readers of `path` see either the old content or the new, never a prefix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| CurateError::io("create dir", dir, e))?;
    }
    let tmp = tmp_path(path);
    {
        let file = File::create(&tmp).map_err(|e| CurateError::io("create temp file", &tmp, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytes)
            .map_err(|e| CurateError::io("write temp file", &tmp, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| CurateError::io("flush temp file", &tmp, e.into_error()))?;
        file.sync_all()
            .map_err(|e| CurateError::io("sync temp file", &tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CurateError::io("rename temp file over", path, e)
    })?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// SHA-256 of the file's exact bytes, read in fixed-size chunks.
pub fn hash(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| CurateError::io("open for hashing", path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| CurateError::io("read for hashing", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Number of non-blank lines in the file.
pub fn count_lines(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|e| CurateError::io("open for counting", path, e))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| CurateError::io("read for counting", path, e))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
