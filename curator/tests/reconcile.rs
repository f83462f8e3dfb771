use chrono::{DateTime, TimeZone, Utc};
use curator::filter::{RejectReason, passes_entry_threshold};
use curator::migrate::PatchRule;
use curator::pipeline::Origin;
use curator::store::{self, OnMalformed};
use curator::{RunConfig, Stage, reconcile};
use roster_types::{Manifest, Record};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn profile(id: &str, handle: &str, verified: &str, followers: u64) -> Value {
    json!({
        "id": id,
        "handle": handle,
        "verified": verified,
        "followers_count": followers,
    })
}

fn write_batch(dir: &Path, name: &str, lines: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let mut file = fs::File::create(&path).unwrap();
    for line in lines {
        serde_json::to_writer(&mut file, line).unwrap();
        writeln!(file).unwrap();
    }
    path
}

fn config(dir: &TempDir, incoming: Vec<PathBuf>) -> RunConfig {
    RunConfig {
        store: dir.path().join("index.jsonl"),
        manifest: dir.path().join("manifest.json"),
        incoming,
        ..Default::default()
    }
}

fn published(config: &RunConfig) -> Vec<Record> {
    store::load(&config.store, OnMalformed::Abort).unwrap().records
}

fn read_manifest(config: &RunConfig) -> Manifest {
    serde_json::from_str(&fs::read_to_string(&config.manifest).unwrap()).unwrap()
}

fn seed(dir: &TempDir, lines: &[Value]) -> RunConfig {
    let batch = write_batch(dir.path(), "seed.jsonl", lines);
    let cfg = config(dir, vec![batch]);
    reconcile(&cfg, at(1)).unwrap();
    config(dir, Vec::new())
}

#[test]
fn rerun_without_new_batches_is_byte_identical() {
    let dir = tempdir().unwrap();
    let cfg = seed(
        &dir,
        &[
            profile("101", "zeta", "none", 2_000_000),
            profile("102", "Alpha", "blue", 45_000),
            json!({ "id": 103, "username": "legacy_bool", "verified": true, "followers_count": 90_000 }),
            profile("104", "beta", "legacy", 2_000_000),
        ],
    );
    let store_first = fs::read(&cfg.store).unwrap();
    let manifest_first = fs::read(&cfg.manifest).unwrap();

    let second = reconcile(&cfg, at(2)).unwrap();
    assert!(!second.store_changed);
    assert_eq!(fs::read(&cfg.store).unwrap(), store_first);
    assert_eq!(fs::read(&cfg.manifest).unwrap(), manifest_first);

    reconcile(&cfg, at(3)).unwrap();
    assert_eq!(fs::read(&cfg.store).unwrap(), store_first);
    assert_eq!(fs::read(&cfg.manifest).unwrap(), manifest_first);
}

#[test]
fn failing_incoming_record_leaves_store_content_unchanged() {
    let dir = tempdir().unwrap();
    let cfg = seed(
        &dir,
        &[
            profile("201", "first", "none", 80_000),
            profile("202", "second", "blue", 35_000),
        ],
    );
    let before = read_manifest(&cfg);
    assert_eq!(before.count, 2);

    let batch = write_batch(dir.path(), "b1.jsonl", &[profile("203", "tiny", "none", 1_200)]);
    let cfg = config(&dir, vec![batch]);
    let report = reconcile(&cfg, at(5)).unwrap();

    assert_eq!(report.published, 2);
    assert_eq!(report.rejected_for(RejectReason::BelowThreshold), 1);
    let after = read_manifest(&cfg);
    assert_eq!(after.count, 2);
    assert_eq!(after.sha256, before.sha256);
}

#[test]
fn manifest_describes_exact_store_bytes() {
    let dir = tempdir().unwrap();
    let cfg = seed(
        &dir,
        &[
            profile("301", "one", "none", 60_000),
            profile("302", "two", "org", 31_000),
            profile("303", "three", "none", 700_000),
        ],
    );
    let bytes = fs::read(&cfg.store).unwrap();
    let manifest = read_manifest(&cfg);

    let non_blank = String::from_utf8(bytes.clone())
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();
    assert_eq!(manifest.count, non_blank);
    assert_eq!(manifest.sha256, format!("{:x}", Sha256::digest(&bytes)));
    assert_eq!(manifest.created_at, at(1));
    assert!(manifest.score_formula.starts_with("log_followers_v0"));
    assert!(curator::manifest::verify(&cfg.store, &cfg.manifest).is_ok());
}

#[test]
fn published_set_is_unique_sorted_and_above_threshold() {
    let dir = tempdir().unwrap();
    let cfg = seed(
        &dir,
        &[
            profile("401", "shared", "none", 100_000),
            profile("402", "other", "blue", 40_000),
        ],
    );
    let batch = write_batch(
        dir.path(),
        "b1.jsonl",
        &[
            profile("401", "brand_new", "none", 900_000),
            profile("499", "SHARED", "none", 900_000),
            profile("403", "fresh", "none", 60_000),
            profile("404", "fresh2", "none", 60_000),
            profile("404", "fresh3", "none", 60_000),
            profile("abc", "fake_id", "none", 900_000),
            profile("405", "bad-handle", "none", 900_000),
            json!({ "id": "406", "handle": "corp", "verified": "org", "followers_count": 900_000, "is_org": true }),
        ],
    );
    let cfg = config(&dir, vec![batch]);
    let report = reconcile(&cfg, at(2)).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.rejected_for(RejectReason::Duplicate), 3);
    assert_eq!(report.rejected_for(RejectReason::PlaceholderId), 1);
    assert_eq!(report.rejected_for(RejectReason::InvalidHandle), 1);
    assert_eq!(report.rejected_for(RejectReason::OrgOrOfficial), 1);

    let records = published(&cfg);
    assert_eq!(records.len(), 4);
    assert_unique(&records);
    assert_sorted(&records);
    for record in &records {
        assert!(passes_entry_threshold(record));
        assert!(record.meta.score.is_some());
        assert_eq!(record.meta.entry_threshold_passed, Some(true));
        assert!(!record.is_org && !record.is_official);
    }
}

#[test]
fn dedupe_example_through_the_pipeline() {
    let dir = tempdir().unwrap();
    let cfg = seed(&dir, &[profile("1", "a", "none", 60_000)]);
    let batch = write_batch(
        dir.path(),
        "b1.jsonl",
        &[profile("2", "a", "none", 60_000), profile("3", "b", "none", 60_000)],
    );
    let cfg = config(&dir, vec![batch]);
    let report = reconcile(&cfg, at(2)).unwrap();

    let ids: HashSet<_> = published(&cfg).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, HashSet::from(["1".to_string(), "3".to_string()]));
    let dup: Vec<_> = report
        .rejected
        .iter()
        .filter(|r| r.reason == RejectReason::Duplicate)
        .collect();
    assert_eq!(dup.len(), 1);
    assert_eq!(dup[0].record.id, "2");
    assert_eq!(dup[0].origin, Origin::Incoming);
}

#[test]
fn empty_identity_fields_are_rejected_with_reasons_in_both_modes() {
    let dir = tempdir().unwrap();
    let batch = write_batch(
        dir.path(),
        "b1.jsonl",
        &[
            profile("5", "", "none", 90_000),
            profile("", "no_id", "none", 90_000),
            profile("6", "valid", "none", 90_000),
        ],
    );

    for on_malformed in [OnMalformed::Skip, OnMalformed::Abort] {
        let mut cfg = config(&dir, vec![batch.clone()]);
        cfg.on_malformed = on_malformed;
        let report = reconcile(&cfg, at(2)).unwrap();
        assert_eq!(report.schema_violations, 0);
        assert_eq!(report.rejected_for(RejectReason::EmptyHandle), 1);
        assert_eq!(report.rejected_for(RejectReason::PlaceholderId), 1);
        assert_eq!(report.published, 1);
    }
}

#[test]
fn malformed_batch_line_is_skipped_or_aborts() {
    let dir = tempdir().unwrap();
    let cfg = seed(&dir, &[profile("501", "keeper", "none", 60_000)]);
    let store_before = fs::read(&cfg.store).unwrap();

    let batch = dir.path().join("b1.jsonl");
    fs::write(
        &batch,
        format!("{{oops\n{}\n", profile("502", "newbie", "none", 70_000)),
    )
    .unwrap();

    let mut strict = config(&dir, vec![batch.clone()]);
    strict.on_malformed = OnMalformed::Abort;
    let err = reconcile(&strict, at(2)).unwrap_err();
    assert_eq!(err.stage, Stage::LoadIncoming);
    assert_eq!(err.processed, 1);
    assert_eq!(fs::read(&cfg.store).unwrap(), store_before);

    let lenient = config(&dir, vec![batch]);
    let report = reconcile(&lenient, at(2)).unwrap();
    assert_eq!(report.malformed, 1);
    assert_eq!(report.added, 1);
}

#[test]
fn unscored_batch_records_are_scored_and_stamped() {
    let dir = tempdir().unwrap();
    let cfg = seed(&dir, &[profile("601", "million", "blue", 1_000_000)]);
    let records = published(&cfg);
    assert_eq!(records[0].meta.score, Some(70.0));
    assert_eq!(records[0].meta.quality_score, Some(70.0));
    assert_eq!(records[0].meta.last_refresh_at, Some(at(1)));
    assert!(records[0].meta.provenance_hash.is_some());
}

#[test]
fn patch_rules_select_by_id_prefix() {
    let dir = tempdir().unwrap();
    seed(
        &dir,
        &[
            profile("7701", "brand_a", "none", 90_000),
            profile("8801", "person", "none", 90_000),
        ],
    );
    let mut cfg = config(&dir, Vec::new());
    cfg.patches = vec![PatchRule {
        id_prefix: Some("77".into()),
        set_is_org: Some(true),
        ..Default::default()
    }];
    let report = reconcile(&cfg, at(2)).unwrap();

    assert_eq!(report.patched, 1);
    let records = published(&cfg);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].handle, "person");
    let rejected = &report.rejected[0];
    assert_eq!(rejected.origin, Origin::Existing);
    assert_eq!(rejected.reason, RejectReason::OrgOrOfficial);
}

#[test]
fn changed_store_is_archived_first() {
    let dir = tempdir().unwrap();
    let cfg = seed(&dir, &[profile("901", "first", "none", 60_000)]);
    let original = fs::read(&cfg.store).unwrap();

    let batch = write_batch(dir.path(), "b1.jsonl", &[profile("902", "second", "none", 60_000)]);
    let report = reconcile(&config(&dir, vec![batch]), at(4)).unwrap();
    let archive = report.archive_path.expect("archive written");
    assert_eq!(fs::read(&archive).unwrap(), original);

    let again = reconcile(&cfg, at(5)).unwrap();
    assert!(again.archive_path.is_none());
}

#[test]
fn legacy_store_lines_are_migrated_on_load() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir, Vec::new());
    fs::write(
        &cfg.store,
        concat!(
            r#"{"id":"1001","handle":"old_timer","verified":true,"followers_count":40000,"#,
            r#""meta":{"score":31.0,"activity_metrics":{"tweet_count":500,"total_like_count":1,"#,
            r#""listed_count":0,"account_created_at":"2012-01-01T00:00:00Z","last_captured_at":"2025-01-01T00:00:00Z"}}}"#,
            "\n"
        ),
    )
    .unwrap();

    let report = reconcile(&cfg, at(2)).unwrap();
    assert_eq!(report.migrated, 1);
    let records = published(&cfg);
    assert_eq!(records[0].verified.as_str(), "blue");
    assert_eq!(
        records[0].meta.activity_metrics.as_ref().map(|m| m.media_count),
        Some(100)
    );
    assert_eq!(records[0].meta.score, Some(31.0));
}

fn assert_unique(records: &[Record]) {
    let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    let handles: HashSet<_> = records.iter().map(|r| r.handle_key()).collect();
    assert_eq!(ids.len(), records.len(), "duplicate id published");
    assert_eq!(handles.len(), records.len(), "duplicate handle published");
}

fn assert_sorted(records: &[Record]) {
    for pair in records.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (sa, sb) = (a.meta.score.unwrap(), b.meta.score.unwrap());
        assert!(
            sa > sb
                || (sa == sb && a.followers_count > b.followers_count)
                || (sa == sb && a.followers_count == b.followers_count && a.handle <= b.handle),
            "out of order: {} before {}",
            a.handle,
            b.handle
        );
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn arb_profile() -> impl Strategy<Value = Value> {
        (
            1u32..40,
            "[a-dA-D]{1,3}",
            prop_oneof![Just("none"), Just("blue"), Just("legacy"), Just("org")],
            0u64..3_000_000,
        )
            .prop_map(|(id, handle, verified, followers)| {
                profile(&(1000 + id).to_string(), &handle, verified, followers)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn published_invariants_hold(
            existing in prop::collection::vec(arb_profile(), 0..12),
            incoming in prop::collection::vec(arb_profile(), 0..12),
        ) {
            let dir = tempdir().unwrap();
            let seed_batch = write_batch(dir.path(), "seed.jsonl", &existing);
            reconcile(&config(&dir, vec![seed_batch]), at(1)).unwrap();

            let batch = write_batch(dir.path(), "b1.jsonl", &incoming);
            let cfg = config(&dir, vec![batch]);
            let report = reconcile(&cfg, at(2)).unwrap();

            let records = published(&cfg);
            prop_assert_eq!(records.len(), report.published);
            prop_assert_eq!(read_manifest(&cfg).count, records.len());
            assert_unique(&records);
            assert_sorted(&records);
            for record in &records {
                prop_assert!(passes_entry_threshold(record));
            }

            let store_before = fs::read(&cfg.store).unwrap();
            reconcile(&config(&dir, Vec::new()), at(3)).unwrap();
            prop_assert_eq!(fs::read(&cfg.store).unwrap(), store_before);
        }
    }
}
