use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::ingest::DetectorMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WatchStatus {
    #[default]
    Idle,
    Running,
}

/// Lifecycle state owned by one controller. Cleared back to the default on
/// stop; the generation survives so stale work can be told apart.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchState {
    pub status: WatchStatus,
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.status == WatchStatus::Running
    }

    /// Moves to `Running` and returns the new generation.
    pub fn begin(&mut self, now: DateTime<Utc>) -> u64 {
        self.generation += 1;
        self.status = WatchStatus::Running;
        self.started_at = Some(now);
        self.generation
    }

    pub fn end(&mut self) {
        self.status = WatchStatus::Idle;
        self.started_at = None;
    }
}

/// Single-slot debounce: at most one scan is ever pending.
///
/// The first change signal arms a deadline; further signals before it
/// elapses fold into the same deadline without pushing it back. A signal that
/// lands while a scan is running arms exactly one follow-up.
#[derive(Debug, Clone)]
pub struct PendingScan {
    debounce: Duration,
    deadline: Option<Instant>,
    coalesced: u32,
}

impl PendingScan {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
            coalesced: 0,
        }
    }

    /// Records a change signal. Returns `true` if this signal armed a new
    /// scan and `false` if it was folded into the pending one.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            self.coalesced += 1;
            return false;
        }
        self.deadline = Some(now + self.debounce);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the slot if its deadline has passed, returning how many
    /// signals were folded into it.
    pub fn take_due(&mut self, now: Instant) -> Option<u32> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(std::mem::take(&mut self.coalesced))
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.coalesced = 0;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum ScanOutcome {
    Applied,
    SourceUnavailable(String),
    PersistenceFailure(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub generation: u64,
    pub mode: DetectorMode,
    pub finished_at: DateTime<Utc>,
    pub upserted: usize,
    pub deleted: usize,
    pub malformed: usize,
    pub outcome: ScanOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub generation: u64,
    pub scans_completed: u64,
    pub last_report: Option<ScanReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_and_end_track_generation() {
        let mut state = WatchState::new();
        assert!(!state.is_running());

        assert_eq!(state.begin(Utc::now()), 1);
        assert!(state.is_running());
        state.end();
        assert_eq!(state.status, WatchStatus::Idle);
        assert!(state.started_at.is_none());

        assert_eq!(state.begin(Utc::now()), 2);
    }

    #[test]
    fn rapid_signals_share_one_slot() {
        let start = Instant::now();
        let mut pending = PendingScan::new(Duration::from_millis(100));

        assert!(pending.arm(start));
        assert!(!pending.arm(start + Duration::from_millis(10)));
        assert!(!pending.arm(start + Duration::from_millis(20)));

        assert_eq!(pending.deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(pending.take_due(start + Duration::from_millis(50)), None);
        assert_eq!(pending.take_due(start + Duration::from_millis(100)), Some(2));
        assert!(!pending.is_pending());
        assert_eq!(pending.take_due(start + Duration::from_millis(500)), None);
    }

    #[test]
    fn signal_after_fire_arms_again() {
        let start = Instant::now();
        let mut pending = PendingScan::new(Duration::from_millis(100));
        pending.arm(start);
        pending.take_due(start + Duration::from_millis(100));

        assert!(pending.arm(start + Duration::from_millis(150)));
        assert_eq!(pending.deadline(), Some(start + Duration::from_millis(250)));
    }

    #[test]
    fn cancel_clears_the_slot() {
        let start = Instant::now();
        let mut pending = PendingScan::new(Duration::from_millis(100));
        pending.arm(start);
        pending.arm(start);
        pending.cancel();
        assert!(!pending.is_pending());
        assert_eq!(pending.take_due(start + Duration::from_secs(1)), None);
        assert!(pending.arm(start + Duration::from_secs(1)));
    }
}
