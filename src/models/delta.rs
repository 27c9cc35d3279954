use std::collections::BTreeSet;

use serde::Serialize;

use super::TelemetryRecord;

/// What a scan observed relative to the previously known state.
///
/// `upserts` holds every record present now (new or changed alike), already
/// deduplicated so each id appears once with its last-seen values.
/// `deletions` never overlaps the ids in `upserts`.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub upserts: Vec<TelemetryRecord>,
    pub deletions: BTreeSet<i64>,
    /// Ids the store should keep when deletions are reconciled. `None` means
    /// the scan cannot see the whole source (incremental mode) and no
    /// deletion is attempted.
    pub retain: Option<BTreeSet<i64>>,
    pub malformed: usize,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }
}

/// The portion of a delta the store confirmed. Only this is broadcast.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppliedDelta {
    pub deleted: Vec<i64>,
    pub upserted: Vec<TelemetryRecord>,
}

impl AppliedDelta {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.upserted.is_empty()
    }
}
