//! Applies a delta to the store and to the in-memory mirror of the store.
//!
//! The engine is the only writer of `telemetry_data`. Deletions run first as
//! one set-based statement, then upserts run one record at a time in delta
//! order. Whatever the store confirmed is returned even when a later write
//! fails, so the caller can announce exactly that much and no more.

use std::collections::BTreeMap;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::SyncError;
use crate::models::{AppliedDelta, Delta, TelemetryRecord};

#[derive(Debug)]
pub struct ApplyOutcome {
    pub applied: AppliedDelta,
    pub failure: Option<SyncError>,
}

impl ApplyOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct ReconciliationEngine {
    db: Database,
    tracked: BTreeMap<i64, TelemetryRecord>,
}

impl ReconciliationEngine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            tracked: BTreeMap::new(),
        }
    }

    /// Seeds the mirror from whatever the store already holds, so the first
    /// scan diffs against persisted rows from earlier runs.
    pub async fn hydrate(&mut self) -> Result<usize, SyncError> {
        let records = self
            .db
            .list_records()
            .await
            .context("failed to load persisted telemetry")
            .map_err(SyncError::PersistenceFailure)?;
        self.tracked = records.into_iter().map(|r| (r.id, r)).collect();
        Ok(self.tracked.len())
    }

    pub fn tracked(&self) -> &BTreeMap<i64, TelemetryRecord> {
        &self.tracked
    }

    /// Stops before the delete and between writes once `cancel` fires; the
    /// writes already made are still reported.
    pub async fn apply(&mut self, delta: &Delta, cancel: &CancellationToken) -> ApplyOutcome {
        let mut applied = AppliedDelta::default();

        if let Some(retain) = &delta.retain {
            if cancel.is_cancelled() {
                return ApplyOutcome {
                    applied,
                    failure: Some(SyncError::Cancelled),
                };
            }
            let keep: Vec<i64> = retain.iter().copied().collect();
            match self.db.delete_records_not_in(&keep).await {
                Ok(removed) => {
                    self.tracked.retain(|id, _| retain.contains(id));
                    applied.deleted = removed;
                }
                Err(err) => {
                    return ApplyOutcome {
                        applied,
                        failure: Some(SyncError::PersistenceFailure(err)),
                    };
                }
            }
        }

        for record in &delta.upserts {
            if cancel.is_cancelled() {
                return ApplyOutcome {
                    applied,
                    failure: Some(SyncError::Cancelled),
                };
            }
            if let Err(err) = self.db.upsert_record(record).await {
                return ApplyOutcome {
                    applied,
                    failure: Some(SyncError::PersistenceFailure(err)),
                };
            }
            self.tracked.insert(record.id, record.clone());
            applied.upserted.push(record.clone());
        }

        ApplyOutcome {
            applied,
            failure: None,
        }
    }

    pub fn reset(&mut self) {
        self.tracked.clear();
    }
}
