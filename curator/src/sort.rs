use roster_types::Record;
use std::cmp::Ordering;

pub const SORT_ORDER: &str = "meta.score desc, followers_count desc, handle asc";

/// Canonical published order. Stable, so fully equal keys keep their prior order.
pub fn sort(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(canonical_cmp);
    records
}

/// Score descending, then followers descending, then handle ascending by codepoint.
/// A missing score sorts after every present one.
pub fn canonical_cmp(a: &Record, b: &Record) -> Ordering {
    cmp_score_desc(a.meta.score, b.meta.score)
        .then_with(|| b.followers_count.cmp(&a.followers_count))
        .then_with(|| a.handle.cmp(&b.handle))
}

fn cmp_score_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn is_sorted(records: &[Record]) -> bool {
    records
        .windows(2)
        .all(|w| canonical_cmp(&w[0], &w[1]) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(handle: &str, followers: u64, score: f64) -> Record {
        serde_json::from_value(json!({
            "id": "1",
            "handle": handle,
            "verified": "none",
            "followers_count": followers,
            "meta": { "score": score }
        }))
        .unwrap()
    }

    fn handles(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.handle.as_str()).collect()
    }

    #[test]
    fn orders_by_score_then_followers_then_handle() {
        let sorted = sort(vec![
            record("c", 100, 10.0),
            record("b", 200, 10.0),
            record("a", 100, 10.0),
            record("z", 1, 90.0),
        ]);
        assert_eq!(handles(&sorted), ["z", "b", "a", "c"]);
        assert!(is_sorted(&sorted));
    }

    #[test]
    fn handle_order_is_case_sensitive_codepoint() {
        let sorted = sort(vec![record("b", 1, 1.0), record("B", 1, 1.0), record("a", 1, 1.0)]);
        assert_eq!(handles(&sorted), ["B", "a", "b"]);
    }

    #[test]
    fn equal_keys_keep_prior_order() {
        let mut first = record("same", 5, 5.0);
        first.id = "first".into();
        let mut second = record("same", 5, 5.0);
        second.id = "second".into();

        let sorted = sort(vec![first, second]);
        assert_eq!(sorted[0].id, "first");
        assert_eq!(sorted[1].id, "second");
    }

    #[test]
    fn unscored_records_sink() {
        let mut unscored = record("u", 1_000_000, 0.0);
        unscored.meta.score = None;
        let sorted = sort(vec![unscored, record("s", 1, 0.0)]);
        assert_eq!(handles(&sorted), ["s", "u"]);
    }
}
