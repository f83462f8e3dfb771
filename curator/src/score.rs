use roster_types::{Record, Verified};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Turns raw profile attributes into a ranking value in [0, 100].
///
/// Implementations must be pure in their inputs so the pipeline can swap
/// one for another between runs without touching anything else.
pub trait Scorer {
    /// Version tag a run config selects this scorer by.
    fn version(&self) -> &'static str;
    /// Human-readable formula recorded in the manifest.
    fn formula(&self) -> &'static str;
    fn score(&self, followers_count: u64, verified: Verified) -> f64;
}

/// v0 proxy: log-scaled followers plus a badge boost.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFollowerScorer;

impl LogFollowerScorer {
    pub const VERSION: &'static str = "log_followers_v0";

    fn boost(verified: Verified) -> f64 {
        match verified {
            Verified::Blue => 10.0,
            Verified::Legacy | Verified::Org => 5.0,
            Verified::None => 0.0,
        }
    }
}

impl Scorer for LogFollowerScorer {
    fn version(&self) -> &'static str {
        Self::VERSION
    }

    fn formula(&self) -> &'static str {
        "clip(20*log10(max(followers_count/1000, 0.1)) + boost(blue=10, legacy=5, org=5, none=0), 0, 100), 1dp"
    }

    fn score(&self, followers_count: u64, verified: Verified) -> f64 {
        // floor at 0.1 keeps log10 defined for zero followers
        let base = 20.0 * (followers_count as f64 / 1000.0).max(0.1).log10();
        round_1dp((base + Self::boost(verified)).clamp(SCORE_MIN, SCORE_MAX))
    }
}

/// Default scorer applied to a single pair of inputs.
pub fn score(followers_count: u64, verified: Verified) -> f64 {
    LogFollowerScorer.score(followers_count, verified)
}

/// Look up a scorer by the version string a run config names.
pub fn scorer_for(version: &str) -> Option<Box<dyn Scorer>> {
    match version {
        LogFollowerScorer::VERSION => Some(Box::new(LogFollowerScorer)),
        _ => None,
    }
}

fn round_1dp(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Fill in `meta.score` and `meta.quality_score` when the score is missing.
/// Records that already carry a score come back unchanged.
pub fn score_if_missing(mut record: Record, scorer: &dyn Scorer) -> (Record, bool) {
    if record.meta.score.is_some() {
        return (record, false);
    }
    let value = scorer.score(record.followers_count, record.verified);
    record.meta.quality_score = Some(value);
    record.meta.score = Some(value);
    (record, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thousand_followers_unverified_scores_zero() {
        assert_eq!(score(1000, Verified::None), 0.0);
    }

    #[test]
    fn million_followers_blue_scores_seventy() {
        assert_eq!(score(1_000_000, Verified::Blue), 70.0);
    }

    #[test]
    fn zero_followers_is_defined_and_clipped() {
        assert_eq!(score(0, Verified::None), 0.0);
        // base is -20, blue boost alone cannot lift it above zero
        assert_eq!(score(0, Verified::Blue), 0.0);
    }

    #[test]
    fn score_is_clipped_at_one_hundred() {
        assert_eq!(score(u64::MAX, Verified::Blue), 100.0);
    }

    #[test]
    fn score_is_rounded_to_one_decimal() {
        // 20 * log10(50) = 33.979...
        assert_eq!(score(50_000, Verified::None), 34.0);
        // 20 * log10(30) + 5 = 34.542...
        assert_eq!(score(30_000, Verified::Legacy), 34.5);
    }

    #[test]
    fn legacy_and_org_share_a_boost() {
        assert_eq!(score(200_000, Verified::Legacy), score(200_000, Verified::Org));
        assert!(score(200_000, Verified::Blue) > score(200_000, Verified::Legacy));
    }

    #[test]
    fn existing_score_is_kept() {
        let record: Record = serde_json::from_value(json!({
            "id": "1", "handle": "a", "verified": "blue", "followers_count": 1_000_000,
            "meta": { "score": 42.0 }
        }))
        .unwrap();
        let (record, scored) = score_if_missing(record, &LogFollowerScorer);
        assert!(!scored);
        assert_eq!(record.meta.score, Some(42.0));
        assert!(record.meta.quality_score.is_none());
    }

    #[test]
    fn missing_score_is_filled() {
        let record: Record = serde_json::from_value(json!({
            "id": "1", "handle": "a", "verified": "blue", "followers_count": 1_000_000
        }))
        .unwrap();
        let (record, scored) = score_if_missing(record, &LogFollowerScorer);
        assert!(scored);
        assert_eq!(record.meta.score, Some(70.0));
        assert_eq!(record.meta.quality_score, Some(70.0));
    }

    #[test]
    fn unknown_scorer_version() {
        assert!(scorer_for("engagement_v1").is_none());
        assert_eq!(scorer_for("log_followers_v0").unwrap().version(), "log_followers_v0");
    }
}
