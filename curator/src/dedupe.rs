//! Identity resolution across merges.
//!
//! Identity is the union of two keys: `id` and the case-folded `handle`.
//! An incoming record collides if either key is already claimed, whether by
//! existing data or by an earlier incoming record. First seen wins, so the
//! result depends only on iteration order.

use roster_types::Record;
use std::collections::HashSet;

use crate::filter::RejectReason;

#[derive(Debug, Default)]
pub struct DedupeOutcome {
    pub new_unique: Vec<Record>,
    pub rejected: Vec<(Record, RejectReason)>,
}

#[derive(Debug, Default)]
struct ClaimedKeys {
    ids: HashSet<String>,
    handles: HashSet<String>,
}

impl ClaimedKeys {
    fn collides(&self, record: &Record) -> bool {
        self.ids.contains(&record.id) || self.handles.contains(&record.handle_key())
    }

    fn claim(&mut self, record: &Record) {
        self.ids.insert(record.id.clone());
        self.handles.insert(record.handle_key());
    }
}

/// Return the incoming records that claim no key already taken.
/// `existing` is only read; nothing is ever removed from it.
pub fn dedupe(existing: &[Record], incoming: Vec<Record>) -> DedupeOutcome {
    let mut claimed = ClaimedKeys::default();
    for record in existing {
        claimed.claim(record);
    }

    let mut outcome = DedupeOutcome::default();
    for record in incoming {
        if claimed.collides(&record) {
            tracing::debug!(id = %record.id, handle = %record.handle, "duplicate identity");
            outcome.rejected.push((record, RejectReason::Duplicate));
            continue;
        }
        claimed.claim(&record);
        outcome.new_unique.push(record);
    }
    outcome
}
