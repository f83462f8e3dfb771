//! One merge-and-republish run over the record store.
//!
//! Stages run strictly in order:
//! `LOAD_EXISTING → LOAD_INCOMING → PATCH → VALIDATE → DEDUPE → MERGE → SCORE → SORT → WRITE → PUBLISH_MANIFEST → DONE`.
//!
//! Paths are touched only by the load stages and by `WRITE`/`PUBLISH_MANIFEST`.
//! Between them the records travel as values. Any failure before `WRITE`
//! leaves the store on disk exactly as it was. Running the pipeline again on
//! its own output with no new batches reproduces the store and manifest byte
//! for byte.

use chrono::{DateTime, Utc};
use roster_types::{Manifest, Record};
use std::fmt;
use std::path::PathBuf;

use crate::archive;
use crate::config::RunConfig;
use crate::dedupe::dedupe;
use crate::error::{CurateError, ReconcileError, Result};
use crate::filter::{RejectReason, filter_records};
use crate::manifest::{self, Expected, ManifestInfo};
use crate::migrate::apply_patches;
use crate::provenance::provenance_hash;
use crate::score::{Scorer, score_if_missing};
use crate::sort::{SORT_ORDER, sort};
use crate::store::{self, Loaded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    LoadExisting,
    LoadIncoming,
    Patch,
    Validate,
    Dedupe,
    Merge,
    Score,
    Sort,
    Write,
    PublishManifest,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadExisting => "LOAD_EXISTING",
            Self::LoadIncoming => "LOAD_INCOMING",
            Self::Patch => "PATCH",
            Self::Validate => "VALIDATE",
            Self::Dedupe => "DEDUPE",
            Self::Merge => "MERGE",
            Self::Score => "SCORE",
            Self::Sort => "SORT",
            Self::Write => "WRITE",
            Self::PublishManifest => "PUBLISH_MANIFEST",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Existing,
    Incoming,
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub origin: Origin,
    pub record: Record,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub existing_loaded: usize,
    pub incoming_loaded: usize,
    pub incoming_files: Vec<PathBuf>,
    pub malformed: usize,
    pub schema_violations: usize,
    pub migrated: usize,
    pub patched: usize,
    pub rejected: Vec<Rejection>,
    pub added: usize,
    pub scored: usize,
    pub published: usize,
    pub store_changed: bool,
    pub archive_path: Option<PathBuf>,
    pub manifest: Manifest,
}

impl ReconcileReport {
    pub fn rejected_for(&self, reason: RejectReason) -> usize {
        self.rejected.iter().filter(|r| r.reason == reason).count()
    }
}

/// Tracks where the run is so an abort can say how far it got.
struct Progress {
    stage: Stage,
    processed: usize,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        tracing::debug!(stage = %stage, processed = self.processed, "entering stage");
    }

    fn fail(&self, source: CurateError) -> ReconcileError {
        ReconcileError {
            stage: self.stage,
            processed: self.processed,
            source,
        }
    }

    fn check<T>(&self, result: Result<T>) -> std::result::Result<T, ReconcileError> {
        result.map_err(|source| self.fail(source))
    }
}

#[derive(Debug, Default)]
struct LoadTotals {
    malformed: usize,
    schema_violations: usize,
    migrated: usize,
}

impl LoadTotals {
    fn absorb(&mut self, loaded: &Loaded) {
        self.malformed += loaded.malformed;
        self.schema_violations += loaded.schema_violations;
        self.migrated += loaded.migrated;
    }
}

/// Merge the configured batches into the store and republish the manifest.
///
/// `now` stamps freshly refreshed records, new archives, and a manifest
/// whose content changed.
pub fn reconcile(
    config: &RunConfig,
    now: DateTime<Utc>,
) -> std::result::Result<ReconcileReport, ReconcileError> {
    let mut progress = Progress {
        stage: Stage::LoadExisting,
        processed: 0,
    };
    progress.check(config.validate())?;
    let scorer = progress.check(config.scorer())?;
    let rules = config.filter_rules();
    let mut totals = LoadTotals::default();

    // LOAD_EXISTING
    let existing = progress.check(store::load(&config.store, config.on_malformed))?;
    totals.absorb(&existing);
    let existing = existing.records;
    let existing_loaded = existing.len();
    progress.processed += existing_loaded;
    tracing::info!(store = %config.store.display(), records = existing_loaded, "loaded existing store");

    // LOAD_INCOMING
    progress.enter(Stage::LoadIncoming);
    let incoming_files = progress.check(config.incoming_files())?;
    let mut incoming = Vec::new();
    for path in &incoming_files {
        if !path.is_file() {
            let err = CurateError::io(
                "open incoming batch",
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            );
            return Err(progress.fail(err));
        }
        let loaded = progress.check(store::load(path, config.on_malformed))?;
        totals.absorb(&loaded);
        progress.processed += loaded.records.len();
        tracing::info!(batch = %path.display(), records = loaded.records.len(), "loaded incoming batch");
        incoming.extend(loaded.records);
    }
    let incoming_loaded = incoming.len();

    // PATCH
    progress.enter(Stage::Patch);
    let (existing, patched_existing) = apply_patches(existing, &config.patches);
    let (incoming, patched_incoming) = apply_patches(incoming, &config.patches);
    let patched = patched_existing + patched_incoming;
    if patched > 0 {
        tracing::info!(patched, "applied patch rules");
    }

    // VALIDATE
    progress.enter(Stage::Validate);
    let mut rejected = Vec::new();
    let existing = filter_records(existing, &rules);
    let incoming = filter_records(incoming, &rules);
    collect(&mut rejected, Origin::Existing, existing.rejected);
    collect(&mut rejected, Origin::Incoming, incoming.rejected);

    // DEDUPE: the store against itself, then incoming against the store.
    progress.enter(Stage::Dedupe);
    let existing = dedupe(&[], existing.kept);
    collect(&mut rejected, Origin::Existing, existing.rejected);
    let incoming = dedupe(&existing.new_unique, incoming.kept);
    collect(&mut rejected, Origin::Incoming, incoming.rejected);

    // MERGE
    progress.enter(Stage::Merge);
    let added = incoming.new_unique.len();
    let merged: Vec<Record> = existing
        .new_unique
        .into_iter()
        .chain(incoming.new_unique.into_iter().map(|r| stamp_refresh(r, now)))
        .collect();

    // SCORE
    progress.enter(Stage::Score);
    let mut scored = 0;
    let merged: Vec<Record> = merged
        .into_iter()
        .map(|record| {
            let (record, was_scored) = finalize(record, scorer.as_ref());
            if was_scored {
                scored += 1;
            }
            record
        })
        .collect();

    // SORT
    progress.enter(Stage::Sort);
    let published = sort(merged);

    // WRITE
    progress.enter(Stage::Write);
    let bytes = progress.check(store::render(&published))?;
    let expected = Expected {
        count: published.len(),
        sha256: store::hash_bytes(&bytes),
    };
    let previous = progress.check(store::read_if_exists(&config.store))?;
    let store_changed = previous.as_deref() != Some(bytes.as_slice());
    let mut archive_path = None;
    if store_changed {
        if previous.is_some() {
            let archived = progress.check(archive::archive_before_replace(
                &config.store,
                config.keep_archives,
                now,
            ))?;
            archive_path = archived.archive_path;
        }
        progress.check(store::write_atomic(&config.store, &bytes))?;
        tracing::info!(store = %config.store.display(), records = published.len(), "store rewritten");
    } else {
        tracing::info!(store = %config.store.display(), "store unchanged");
    }

    // PUBLISH_MANIFEST
    progress.enter(Stage::PublishManifest);
    let info = ManifestInfo {
        schema_version: config.schema_version.clone(),
        sort_order: SORT_ORDER.to_string(),
        score_formula: format!("{}: {}", scorer.version(), scorer.formula()),
    };
    let manifest = progress.check(manifest::publish(
        &config.store,
        &config.manifest,
        &info,
        now,
        Some(&expected),
    ))?;

    progress.enter(Stage::Done);
    let report = ReconcileReport {
        existing_loaded,
        incoming_loaded,
        incoming_files,
        malformed: totals.malformed,
        schema_violations: totals.schema_violations,
        migrated: totals.migrated,
        patched,
        rejected,
        added,
        scored,
        published: published.len(),
        store_changed,
        archive_path,
        manifest,
    };
    tracing::info!(
        published = report.published,
        added = report.added,
        rejected = report.rejected.len(),
        sha256 = %report.manifest.sha256,
        "reconcile complete"
    );
    Ok(report)
}

fn collect(into: &mut Vec<Rejection>, origin: Origin, rejected: Vec<(Record, RejectReason)>) {
    into.extend(rejected.into_iter().map(|(record, reason)| Rejection {
        origin,
        record,
        reason,
    }));
}

/// Newly merged records without a refresh time were refreshed by this run.
fn stamp_refresh(mut record: Record, now: DateTime<Utc>) -> Record {
    if record.meta.last_refresh_at.is_none() {
        record.meta.last_refresh_at = Some(now);
    }
    record
}

/// Score when missing, cache the validator decision, and refresh the fingerprint.
fn finalize(record: Record, scorer: &dyn Scorer) -> (Record, bool) {
    let (mut record, scored) = score_if_missing(record, scorer);
    record.meta.entry_threshold_passed = Some(true);
    record.meta.provenance_hash = Some(provenance_hash(&record));
    (record, scored)
}
