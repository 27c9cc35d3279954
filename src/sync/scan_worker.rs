use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::ingest::{ChangeDetector, SourceFile};
use crate::models::Delta;

use super::publisher::EventPublisher;
use super::reconcile::ReconciliationEngine;
use super::state::{PendingScan, ScanOutcome, ScanReport, ScanStats};

// Set to false to silence this module's per-scan logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSignal {
    FileChanged,
}

/// Everything one watch generation needs. Owned by a single task, so scans
/// for the same source never overlap.
pub struct ScanWorker {
    pub generation: u64,
    pub source: SourceFile,
    pub detector: ChangeDetector,
    pub engine: ReconciliationEngine,
    pub publisher: EventPublisher,
    pub stats_tx: Arc<watch::Sender<ScanStats>>,
    pub pending: PendingScan,
    hydrated: bool,
}

impl ScanWorker {
    pub fn new(
        generation: u64,
        source: SourceFile,
        detector: ChangeDetector,
        engine: ReconciliationEngine,
        publisher: EventPublisher,
        stats_tx: Arc<watch::Sender<ScanStats>>,
        pending: PendingScan,
    ) -> Self {
        Self {
            generation,
            source,
            detector,
            engine,
            publisher,
            stats_tx,
            pending,
            hydrated: false,
        }
    }

    /// One detect → reconcile → publish cycle. Results are dropped if the
    /// generation was cancelled while the cycle was in flight.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        if !self.hydrated {
            match self.engine.hydrate().await {
                Ok(count) => {
                    log_debug!("loaded {count} persisted records before first scan");
                    self.hydrated = true;
                }
                Err(err) => log_warn!("scan continuing without persisted mirror: {err}"),
            }
        }

        let delta = match self.detector.detect(&self.source, self.engine.tracked()).await {
            Ok(delta) => delta,
            Err(err) => {
                log_warn!("skipping scan: {err}");
                self.record(&Delta::default(), 0, 0, ScanOutcome::SourceUnavailable(err.to_string()));
                return;
            }
        };

        if cancel.is_cancelled() {
            log_debug!("dropping scan result for stopped generation {}", self.generation);
            return;
        }

        if delta.malformed > 0 {
            log_info!("ignored {} malformed line(s) in {}", delta.malformed, self.source.path().display());
        }

        let outcome = self.engine.apply(&delta, cancel).await;

        if cancel.is_cancelled() {
            log_debug!("dropping applied delta for stopped generation {}", self.generation);
            return;
        }

        if !outcome.applied.deleted.is_empty() {
            log_info!("Synced: Deleted IDs {:?}", outcome.applied.deleted);
        }
        if !outcome.applied.upserted.is_empty() {
            log_info!("Synced: upserted {} record(s)", outcome.applied.upserted.len());
        }
        self.publisher.publish(&outcome.applied);

        let deleted = outcome.applied.deleted.len();
        let upserted = outcome.applied.upserted.len();
        let report_outcome = match outcome.failure {
            None => {
                self.detector.commit();
                ScanOutcome::Applied
            }
            Some(SyncError::Cancelled) => return,
            Some(err) => {
                log_error!("Database sync error: {err}");
                ScanOutcome::PersistenceFailure(err.to_string())
            }
        };

        self.record(&delta, upserted, deleted, report_outcome);
    }

    fn record(&self, delta: &Delta, upserted: usize, deleted: usize, outcome: ScanOutcome) {
        let report = ScanReport {
            generation: self.generation,
            mode: self.detector.mode(),
            finished_at: Utc::now(),
            upserted,
            deleted,
            malformed: delta.malformed,
            outcome,
        };
        self.stats_tx.send_modify(|stats| {
            stats.generation = report.generation;
            stats.scans_completed += 1;
            stats.last_report = Some(report);
        });
    }
}

/// Runs the initial scan, then waits for change signals and runs one
/// debounced scan per burst until `cancel_token` fires or every signal
/// sender is gone.
pub async fn scan_loop(
    mut worker: ScanWorker,
    mut signals: mpsc::UnboundedReceiver<ScanSignal>,
    cancel_token: CancellationToken,
) {
    log_info!(
        "watching {} ({}, generation {})",
        worker.source.path().display(),
        worker.detector.mode().as_str(),
        worker.generation
    );

    worker.run_cycle(&cancel_token).await;

    loop {
        let deadline = worker.pending.deadline();
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("scan loop shutting down");
                break;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(coalesced) = worker.pending.take_due(Instant::now()) {
                    if coalesced > 0 {
                        log_debug!("coalesced {coalesced} change signal(s) into one scan");
                    }
                    worker.run_cycle(&cancel_token).await;
                }
            }
            signal = signals.recv() => match signal {
                Some(ScanSignal::FileChanged) => {
                    worker.pending.arm(Instant::now());
                }
                None => {
                    log_debug!("change signal channel closed");
                    break;
                }
            },
        }
    }

    worker.pending.cancel();
    worker.engine.reset();
}
