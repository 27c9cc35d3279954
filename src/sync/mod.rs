pub mod commands;
pub mod controller;
pub mod publisher;
pub mod reconcile;
pub mod scan_worker;
pub mod state;

pub use controller::{StartOutcome, StopOutcome, WatchController};
pub use publisher::{EventPublisher, TelemetryEvent};
pub use reconcile::{ApplyOutcome, ReconciliationEngine};
pub use state::{ScanOutcome, ScanReport, ScanStats, WatchState, WatchStatus};
