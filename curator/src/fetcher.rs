//! Adapter between the external profile fetcher and the record schema.
//!
//! The fetcher itself lives outside this crate. It returns raw profile
//! dictionaries with its own field names, and may fail per handle without
//! failing the batch.

use chrono::{DateTime, Utc};
use roster_types::{ActivityMetrics, Meta, Record, SourceEntry, Verified};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{CurateError, Result};
use crate::migrate::{estimate_media_count, verified_from_bool};

pub const FETCH_METHOD: &str = "profile_fetcher";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub tweet_count: Option<u64>,
    #[serde(default)]
    pub listed_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub media_count: Option<u64>,
}

/// One profile as the fetcher reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "handle")]
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    /// Either a legacy boolean badge or an enumerated string.
    #[serde(default)]
    pub verified: Value,
    #[serde(default)]
    pub verified_type: Option<String>,
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    pub tweet_count: Option<u64>,
    #[serde(default)]
    pub media_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub listed_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, found {other}"
        ))),
    }
}

impl RawProfile {
    fn metric(&self, flat: Option<u64>, nested: impl Fn(&PublicMetrics) -> Option<u64>) -> Option<u64> {
        flat.or_else(|| self.public_metrics.as_ref().and_then(nested))
    }

    pub fn followers(&self) -> u64 {
        self.metric(self.followers_count, |m| m.followers_count)
            .unwrap_or(0)
    }

    /// `verified_type` wins over the plain `verified` field when both are present.
    pub fn verified_kind(&self) -> Verified {
        if let Some(kind) = self.verified_type.as_deref() {
            match kind.to_lowercase().as_str() {
                "blue" => return Verified::Blue,
                "legacy" => return Verified::Legacy,
                "business" | "government" | "org" => return Verified::Org,
                _ => {}
            }
        }
        match &self.verified {
            Value::Bool(flag) => verified_from_bool(*flag),
            Value::String(s) => s.parse().unwrap_or(Verified::None),
            _ => Verified::None,
        }
    }

    /// Map onto the canonical schema. Score and provenance are left for the pipeline.
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> Record {
        let followers_count = self.followers();
        let verified = self.verified_kind();

        let tweets = self.metric(self.tweet_count, |m| m.tweet_count);
        let activity_metrics = match (tweets, self.created_at) {
            (Some(tweet_count), Some(account_created_at)) => Some(ActivityMetrics {
                tweet_count,
                media_count: self
                    .metric(self.media_count, |m| m.media_count)
                    .unwrap_or_else(|| estimate_media_count(tweet_count)),
                total_like_count: self.metric(self.like_count, |m| m.like_count).unwrap_or(0),
                listed_count: self.metric(self.listed_count, |m| m.listed_count).unwrap_or(0),
                account_created_at,
                last_captured_at: fetched_at,
            }),
            _ => None,
        };

        let evidence = json!({ "username": self.username });
        Record {
            id: self.id,
            handle: self.username,
            name: self.name,
            lang_primary: self.lang,
            topic_tags: Vec::new(),
            location: self.location,
            description: self.description,
            verified,
            followers_count,
            is_org: false,
            is_official: false,
            meta: Meta {
                activity_metrics,
                last_refresh_at: Some(fetched_at),
                sources: vec![SourceEntry {
                    method: FETCH_METHOD.to_string(),
                    fetched_at,
                    evidence,
                }],
                ..Default::default()
            },
            extra: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub handle: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FetchBatch {
    pub profiles: Vec<RawProfile>,
    pub failures: Vec<FetchFailure>,
}

pub trait ProfileFetcher {
    /// Fetch the requested handles, dropping profiles under `min_followers`.
    /// Per-handle problems go into `failures`; only a whole-batch failure is an error.
    fn fetch(&self, handles: &[String], min_followers: u64) -> Result<FetchBatch>;
}

/// Reads a JSONL dump written by the fetcher.
#[derive(Debug, Clone)]
pub struct ProfileDump {
    path: PathBuf,
}

impl ProfileDump {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, RawProfile>> {
        let file =
            File::open(&self.path).map_err(|e| CurateError::io("open profile dump", &self.path, e))?;
        let mut by_handle = HashMap::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CurateError::io("read profile dump", &self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawProfile>(&line) {
                Ok(profile) => {
                    by_handle
                        .entry(profile.username.to_lowercase())
                        .or_insert(profile);
                }
                Err(e) => {
                    tracing::warn!(line = idx + 1, error = %e, "skipping unreadable profile");
                }
            }
        }
        Ok(by_handle)
    }
}

impl ProfileFetcher for ProfileDump {
    fn fetch(&self, handles: &[String], min_followers: u64) -> Result<FetchBatch> {
        let mut available = self.read_all()?;
        let mut batch = FetchBatch::default();
        let mut requested = HashSet::new();

        for handle in handles {
            let key = handle.trim_start_matches('@').to_lowercase();
            if !requested.insert(key.clone()) {
                continue;
            }
            match available.remove(&key) {
                Some(profile) if profile.followers() >= min_followers => {
                    batch.profiles.push(profile);
                }
                Some(profile) => batch.failures.push(FetchFailure {
                    handle: handle.clone(),
                    reason: format!("below_min_followers ({})", profile.followers()),
                }),
                None => batch.failures.push(FetchFailure {
                    handle: handle.clone(),
                    reason: "not_found".to_string(),
                }),
            }
        }
        Ok(batch)
    }
}

/// Run a fetch and map every returned profile onto a record.
pub fn fetch_records(
    fetcher: &dyn ProfileFetcher,
    handles: &[String],
    min_followers: u64,
    fetched_at: DateTime<Utc>,
) -> Result<(Vec<Record>, Vec<FetchFailure>)> {
    let batch = fetcher.fetch(handles, min_followers)?;
    for failure in &batch.failures {
        tracing::warn!(handle = %failure.handle, reason = %failure.reason, "fetch failed for handle");
    }
    let records = batch
        .profiles
        .into_iter()
        .map(|p| p.into_record(fetched_at))
        .collect();
    Ok((records, batch.failures))
}
