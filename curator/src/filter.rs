use once_cell::sync::Lazy;
use regex::Regex;
use roster_types::Record;
use serde::Deserialize;
use std::fmt;

pub const VERIFIED_MIN_FOLLOWERS: u64 = 30_000;
pub const UNVERIFIED_MIN_FOLLOWERS: u64 = 50_000;
pub const MAX_HANDLE_LEN: usize = 15;

/// Prefixes the batch generators used for synthetic ids that were never fetched.
pub const DEFAULT_PLACEHOLDER_ID_PREFIXES: &[&str] = &["999999", "000000", "1234567890"];

static HANDLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Two-tier entry rule: a lower bar for badge holders, a higher one for everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntryThreshold {
    pub verified_min: u64,
    pub unverified_min: u64,
}

impl Default for EntryThreshold {
    fn default() -> Self {
        Self {
            verified_min: VERIFIED_MIN_FOLLOWERS,
            unverified_min: UNVERIFIED_MIN_FOLLOWERS,
        }
    }
}

impl EntryThreshold {
    pub fn passes(&self, record: &Record) -> bool {
        let followers = record.followers_count;
        (record.verified.is_verified() && followers >= self.verified_min)
            || followers >= self.unverified_min
    }
}

/// Canonical rule with default cut-offs.
pub fn passes_entry_threshold(record: &Record) -> bool {
    EntryThreshold::default().passes(record)
}

/// True for synthetic ids: empty, non-numeric, or starting with a known fake prefix.
pub fn is_placeholder_id(id: &str) -> bool {
    is_placeholder_id_with(id, DEFAULT_PLACEHOLDER_ID_PREFIXES)
}

pub fn is_placeholder_id_with<S: AsRef<str>>(id: &str, prefixes: &[S]) -> bool {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    prefixes.iter().any(|p| id.starts_with(p.as_ref()))
}

pub fn is_valid_handle(handle: &str) -> bool {
    (1..=MAX_HANDLE_LEN).contains(&handle.len()) && HANDLE_RE.is_match(handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    OrgOrOfficial,
    BelowThreshold,
    PlaceholderId,
    InvalidHandle,
    EmptyHandle,
    ZeroMetrics,
    Duplicate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrgOrOfficial => "org_or_official",
            Self::BelowThreshold => "below_threshold",
            Self::PlaceholderId => "placeholder_id",
            Self::InvalidHandle => "invalid_handle",
            Self::EmptyHandle => "empty_handle",
            Self::ZeroMetrics => "zero_metrics",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the validator needs for one run.
#[derive(Debug, Clone)]
pub struct FilterRules {
    pub threshold: EntryThreshold,
    pub placeholder_prefixes: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            threshold: EntryThreshold::default(),
            placeholder_prefixes: DEFAULT_PLACEHOLDER_ID_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl FilterRules {
    /// First reason the record must not be published, most specific first.
    pub fn check(&self, record: &Record) -> Option<RejectReason> {
        if record.handle.trim().is_empty() {
            return Some(RejectReason::EmptyHandle);
        }
        if !is_valid_handle(&record.handle) {
            return Some(RejectReason::InvalidHandle);
        }
        if is_placeholder_id_with(&record.id, &self.placeholder_prefixes) {
            return Some(RejectReason::PlaceholderId);
        }
        if record.is_org || record.is_official {
            return Some(RejectReason::OrgOrOfficial);
        }
        if has_zero_metrics(record) {
            return Some(RejectReason::ZeroMetrics);
        }
        if !self.threshold.passes(record) {
            return Some(RejectReason::BelowThreshold);
        }
        None
    }
}

/// No followers and no recorded activity: a shell account or a failed fetch.
fn has_zero_metrics(record: &Record) -> bool {
    if record.followers_count > 0 {
        return false;
    }
    match &record.meta.activity_metrics {
        Some(m) => m.tweet_count == 0 && m.total_like_count == 0 && m.listed_count == 0,
        None => true,
    }
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<Record>,
    pub rejected: Vec<(Record, RejectReason)>,
}

/// Split records into those that stay published and those that do not.
/// Records are moved, never edited.
pub fn filter_records(records: Vec<Record>, rules: &FilterRules) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for record in records {
        match rules.check(&record) {
            None => outcome.kept.push(record),
            Some(reason) => {
                tracing::warn!(id = %record.id, handle = %record.handle, reason = %reason, "record rejected");
                outcome.rejected.push((record, reason));
            }
        }
    }
    outcome
}
