use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One influencer profile as it appears on a line of the index store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_primary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topic_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub verified: Verified,
    pub followers_count: u64,
    #[serde(default)]
    pub is_org: bool,
    #[serde(default)]
    pub is_official: bool,
    #[serde(default)]
    pub meta: Meta,
    /// Fields this schema does not know about, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct Meta {
    /// Canonical ranking value in [0, 100].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_threshold_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_metrics: Option<ActivityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActivityMetrics {
    pub tweet_count: u64,
    pub media_count: u64,
    pub total_like_count: u64,
    pub listed_count: u64,
    pub account_created_at: DateTime<Utc>,
    pub last_captured_at: DateTime<Utc>,
}

/// Where a record's data came from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceEntry {
    pub method: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub evidence: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verified {
    None,
    Blue,
    Legacy,
    Org,
}

impl Verified {
    pub const ALL: [Verified; 4] = [
        Verified::None,
        Verified::Blue,
        Verified::Legacy,
        Verified::Org,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Blue => "blue",
            Self::Legacy => "legacy",
            Self::Org => "org",
        }
    }

    /// Any badge at all.
    pub fn is_verified(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Verified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verified {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Verified::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| anyhow!("unknown verified value '{s}' (expected none, blue, legacy or org)"))
    }
}

impl Record {
    /// Case-folded handle used for identity comparisons.
    pub fn handle_key(&self) -> String {
        self.handle.to_lowercase()
    }

    pub fn score(&self) -> Option<f64> {
        self.meta.score
    }
}

/// Integrity and summary metadata for one published snapshot of the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Manifest {
    pub count: usize,
    pub sha256: String,
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub schema_version: String,
    pub sort_order: String,
    pub score_formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

/// Structural check over a raw store line, independent of serde's typed parse.
/// Returns the first problem found so callers can report it as a schema violation.
pub fn validate_record_value(value: &Value) -> Result<()> {
    let obj = value
        .as_object()
        .context("record must be a JSON object")?;

    // Empty values are left for the filter to reject.
    ensure_str(obj, "id")?;
    ensure_str(obj, "handle")?;

    match obj.get("verified") {
        Some(Value::String(s)) => {
            s.parse::<Verified>()?;
        }
        Some(Value::Bool(_)) => bail!("verified must be an enumerated string, found boolean"),
        Some(_) => bail!("verified must be a string"),
        None => bail!("verified missing"),
    }

    ensure!(
        obj.get("followers_count").and_then(Value::as_u64).is_some(),
        "followers_count missing or not a non-negative integer"
    );
    for flag in ["is_org", "is_official"] {
        if let Some(v) = obj.get(flag) {
            ensure!(v.is_boolean(), "{flag} must be a bool when present");
        }
    }

    let Some(meta) = obj.get("meta") else {
        return Ok(());
    };
    let meta = meta.as_object().context("meta must be an object")?;
    for key in ["score", "quality_score"] {
        if let Some(v) = meta.get(key) {
            let n = v
                .as_f64()
                .ok_or_else(|| anyhow!("meta.{key} must be a number"))?;
            ensure!((0.0..=100.0).contains(&n), "meta.{key} out of range: {n}");
        }
    }

    if let Some(metrics) = meta.get("activity_metrics") {
        let metrics = metrics
            .as_object()
            .context("meta.activity_metrics must be an object")?;
        for key in ["tweet_count", "media_count", "total_like_count", "listed_count"] {
            ensure!(
                metrics.get(key).and_then(Value::as_u64).is_some(),
                "meta.activity_metrics.{key} missing or not a non-negative integer"
            );
        }
        for key in ["account_created_at", "last_captured_at"] {
            let ts = ensure_string(metrics, key)
                .with_context(|| format!("meta.activity_metrics.{key}"))?;
            DateTime::parse_from_rfc3339(ts)
                .with_context(|| format!("meta.activity_metrics.{key} must be RFC3339"))?;
        }
    }

    if let Some(sources) = meta.get("sources") {
        let sources = sources
            .as_array()
            .context("meta.sources must be an array when present")?;
        for source in sources {
            let source = source.as_object().context("source must be an object")?;
            ensure_string(source, "method")?;
            ensure_string(source, "fetched_at")?;
        }
    }

    Ok(())
}

fn ensure_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("{key} missing or not a string"))
}

fn ensure_string<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("{key} missing or not a non-empty string"))
}
