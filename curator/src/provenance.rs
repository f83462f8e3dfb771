//! Per-record content fingerprint for audits. Never an identity key.
//!
//! The digest covers, in order and separated by the ASCII unit separator
//! (0x1F): `id`, `handle` as stored, `followers_count` in decimal,
//! `meta.score` with one decimal place, and `meta.last_refresh_at` as
//! RFC 3339 with second precision and a `Z` suffix. Absent values hash as
//! the empty string. Changing this list invalidates every stored hash.

use chrono::SecondsFormat;
use roster_types::Record;
use sha2::{Digest, Sha256};

const FIELD_SEP: &[u8] = b"\x1f";

pub fn provenance_hash(record: &Record) -> String {
    let score = record
        .meta
        .score
        .map(|s| format!("{s:.1}"))
        .unwrap_or_default();
    let refreshed = record
        .meta
        .last_refresh_at
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();

    let followers = record.followers_count.to_string();

    let mut hasher = Sha256::new();
    let fields: [&str; 5] = [
        &record.id,
        &record.handle,
        &followers,
        &score,
        &refreshed,
    ];
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_SEP);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
