//! Declared schema fix-ups and predicate-based patches.
//!
//! Fix-ups run on raw JSON before typed parsing so older store lines
//! (boolean `verified`, missing `media_count`, fetcher field names) load
//! cleanly. Every applied fix-up is reported back to the caller for logging.
//!
//! Patches replace the old positional "fix lines N..M" scripts: a rule picks
//! records by a stable predicate and applies a small set of edits.

use roster_types::{Record, Verified};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Fraction of `tweet_count` used to estimate a missing `media_count`.
const MEDIA_SHARE_OF_TWEETS: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub enum Fixup {
    VerifiedFromBool { was: bool },
    VerifiedDefaulted,
    HandleFromUsername,
    IdStringified,
    MediaCountEstimated { estimate: u64 },
}

impl fmt::Display for Fixup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerifiedFromBool { was } => write!(f, "verified: boolean {was} mapped to enum"),
            Self::VerifiedDefaulted => write!(f, "verified: missing, defaulted to none"),
            Self::HandleFromUsername => write!(f, "handle: copied from username"),
            Self::IdStringified => write!(f, "id: numeric id stringified"),
            Self::MediaCountEstimated { estimate } => {
                write!(f, "media_count: missing, estimated as {estimate}")
            }
        }
    }
}

/// Bring a raw record value up to the current schema in place.
pub fn upgrade_value(value: &mut Value) -> Vec<Fixup> {
    let mut applied = Vec::new();
    let Some(obj) = value.as_object_mut() else {
        return applied;
    };

    if !obj.contains_key("handle")
        && let Some(username) = obj.remove("username")
    {
        obj.insert("handle".to_string(), username);
        applied.push(Fixup::HandleFromUsername);
    }

    if let Some(Value::Number(n)) = obj.get("id") {
        let id = n.to_string();
        obj.insert("id".to_string(), Value::String(id));
        applied.push(Fixup::IdStringified);
    }

    match obj.get("verified") {
        Some(Value::Bool(was)) => {
            let was = *was;
            obj.insert("verified".to_string(), verified_value(verified_from_bool(was)));
            applied.push(Fixup::VerifiedFromBool { was });
        }
        None | Some(Value::Null) => {
            obj.insert("verified".to_string(), verified_value(Verified::None));
            applied.push(Fixup::VerifiedDefaulted);
        }
        Some(_) => {}
    }

    if let Some(metrics) = obj
        .get_mut("meta")
        .and_then(|m| m.get_mut("activity_metrics"))
        .and_then(Value::as_object_mut)
        && let Some(estimate) = backfill_media_count(metrics)
    {
        applied.push(Fixup::MediaCountEstimated { estimate });
    }

    applied
}

/// A boolean badge predates the enumerated form; `true` meant a paid/blue check.
pub fn verified_from_bool(flag: bool) -> Verified {
    if flag { Verified::Blue } else { Verified::None }
}

fn verified_value(v: Verified) -> Value {
    Value::String(v.as_str().to_string())
}

fn backfill_media_count(metrics: &mut Map<String, Value>) -> Option<u64> {
    if metrics.get("media_count").is_some_and(|v| !v.is_null()) {
        return None;
    }
    let tweets = metrics.get("tweet_count").and_then(Value::as_u64)?;
    let estimate = estimate_media_count(tweets);
    metrics.insert("media_count".to_string(), Value::from(estimate));
    Some(estimate)
}

/// 20% of tweets, floored, never negative.
pub fn estimate_media_count(tweet_count: u64) -> u64 {
    (tweet_count as f64 * MEDIA_SHARE_OF_TWEETS).floor().max(0.0) as u64
}

// ── Patches ─────────────────────────────────────────────────────────────

/// Select records by stable identity and edit them.
///
/// A rule with no predicate matches nothing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchRule {
    #[serde(default)]
    pub id_prefix: Option<String>,
    /// Case-insensitive handle list.
    #[serde(default)]
    pub handles: Vec<String>,
    #[serde(default)]
    pub set_verified: Option<Verified>,
    #[serde(default)]
    pub set_is_org: Option<bool>,
    #[serde(default)]
    pub set_is_official: Option<bool>,
    /// Drop the cached score so the scorer recomputes it.
    #[serde(default)]
    pub rescore: bool,
}

impl PatchRule {
    pub fn matches(&self, record: &Record) -> bool {
        if self.id_prefix.is_none() && self.handles.is_empty() {
            return false;
        }
        if let Some(prefix) = &self.id_prefix
            && !record.id.starts_with(prefix.as_str())
        {
            return false;
        }
        if !self.handles.is_empty() {
            let key = record.handle_key();
            if !self.handles.iter().any(|h| h.to_lowercase() == key) {
                return false;
            }
        }
        true
    }

    fn apply(&self, mut record: Record) -> Record {
        if let Some(v) = self.set_verified {
            record.verified = v;
        }
        if let Some(flag) = self.set_is_org {
            record.is_org = flag;
        }
        if let Some(flag) = self.set_is_official {
            record.is_official = flag;
        }
        if self.rescore {
            record.meta.score = None;
            record.meta.quality_score = None;
            record.meta.provenance_hash = None;
        }
        record
    }
}

/// Apply every matching rule, in rule order, returning the new records and how many were touched.
pub fn apply_patches(records: Vec<Record>, rules: &[PatchRule]) -> (Vec<Record>, usize) {
    if rules.is_empty() {
        return (records, 0);
    }
    let mut touched = 0;
    let patched = records
        .into_iter()
        .map(|record| {
            let mut hit = false;
            let record = rules.iter().fold(record, |rec, rule| {
                if rule.matches(&rec) {
                    hit = true;
                    rule.apply(rec)
                } else {
                    rec
                }
            });
            if hit {
                touched += 1;
            }
            record
        })
        .collect();
    (patched, touched)
}
