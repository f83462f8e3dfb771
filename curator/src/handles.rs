//! Candidate handle extraction from a spreadsheet export.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{CurateError, Result};
use crate::filter::is_valid_handle;

pub const DEFAULT_HANDLE_COLUMN: &str = "handle";

const PROFILE_URL_PREFIXES: &[&str] = &[
    "https://x.com/",
    "https://twitter.com/",
    "http://x.com/",
    "http://twitter.com/",
    "https://www.x.com/",
    "https://www.twitter.com/",
    "x.com/",
    "twitter.com/",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidHandle {
    /// 1-based data row, not counting the header.
    pub row: usize,
    pub raw: String,
    pub reason: &'static str,
}

#[derive(Debug, Default)]
pub struct HandleExtraction {
    /// Valid handles in first-seen order, deduplicated case-insensitively.
    pub valid: Vec<String>,
    pub invalid: Vec<InvalidHandle>,
    pub duplicates: usize,
}

/// Strip the decorations people paste around a handle: whitespace, `@`, profile URLs.
pub fn normalize_handle(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in PROFILE_URL_PREFIXES {
        if s.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            s = &s[prefix.len()..];
            break;
        }
    }
    let s = s.split(['/', '?']).next().unwrap_or("");
    s.trim_start_matches('@').trim().to_string()
}

/// Read `column` from a CSV file and keep the cells that are valid handles.
/// Bad cells are reported, never fatal; only an unreadable file or a missing column is.
pub fn extract_handles(csv_path: &Path, column: &str) -> Result<HandleExtraction> {
    let csv_err = |source| CurateError::Csv {
        path: csv_path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let Some(col_idx) = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(column))
    else {
        return Err(CurateError::Config(format!(
            "{}: no '{column}' column (found: {})",
            csv_path.display(),
            headers.iter().collect::<Vec<_>>().join(", ")
        )));
    };

    let mut out = HandleExtraction::default();
    let mut seen = HashSet::new();
    for (idx, row) in reader.records().enumerate() {
        let row_no = idx + 1;
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(row = row_no, error = %e, "unreadable csv row");
                out.invalid.push(InvalidHandle {
                    row: row_no,
                    raw: String::new(),
                    reason: "unreadable_row",
                });
                continue;
            }
        };
        let raw = row.get(col_idx).unwrap_or("");
        let handle = normalize_handle(raw);
        if handle.is_empty() {
            out.invalid.push(InvalidHandle {
                row: row_no,
                raw: raw.to_string(),
                reason: "empty_handle",
            });
            continue;
        }
        if !is_valid_handle(&handle) {
            out.invalid.push(InvalidHandle {
                row: row_no,
                raw: raw.to_string(),
                reason: "invalid_handle",
            });
            continue;
        }
        if !seen.insert(handle.to_lowercase()) {
            out.duplicates += 1;
            continue;
        }
        out.valid.push(handle);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn normalizes_common_decorations() {
        assert_eq!(normalize_handle("  @rustlang "), "rustlang");
        assert_eq!(normalize_handle("https://x.com/rustlang"), "rustlang");
        assert_eq!(normalize_handle("https://Twitter.com/RustLang/status/1?s=20"), "RustLang");
        assert_eq!(normalize_handle("x.com/someone?lang=en"), "someone");
        assert_eq!(normalize_handle(""), "");
    }

    #[test]
    fn keeps_valid_reports_invalid() {
        let file = csv_file(
            "name,Handle\n\
             Rust,@rustlang\n\
             Nobody,\n\
             Spaces,has space\n\
             Long,this_handle_is_too_long\n\
             Again,RUSTLANG\n\
             Ferris,https://x.com/ferris_crab\n",
        );
        let out = extract_handles(file.path(), "handle").unwrap();
        assert_eq!(out.valid, ["rustlang", "ferris_crab"]);
        assert_eq!(out.duplicates, 1);
        let reasons: Vec<_> = out.invalid.iter().map(|i| (i.row, i.reason)).collect();
        assert_eq!(
            reasons,
            [(2, "empty_handle"), (3, "invalid_handle"), (4, "invalid_handle")]
        );
    }

    #[test]
    fn missing_column_is_an_error() {
        let file = csv_file("name,url\nRust,x\n");
        let err = extract_handles(file.path(), "handle").unwrap_err();
        assert!(err.to_string().contains("no 'handle' column"));
    }

    #[test]
    fn short_rows_and_blank_lines_are_tolerated() {
        let file = csv_file("handle,name\nalpha,A\n\nbeta\n");
        let out = extract_handles(file.path(), "handle").unwrap();
        assert_eq!(out.valid, ["alpha", "beta"]);
    }
}
