//! Control surface: start, stop and list. Errors are stringified at this
//! boundary; scan failures never reach these calls.

use serde::Serialize;

use crate::{
    ingest::DetectorMode,
    models::TelemetryRecord,
    sync::{StartOutcome, StopOutcome},
    AppState,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandAck {
    pub message: String,
}

impl CommandAck {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub async fn start_watch(state: &AppState) -> Result<CommandAck, String> {
    let outcome = state.watcher.start().await.map_err(|e| e.to_string())?;
    let message = match outcome {
        StartOutcome::Started { .. } => match state.settings.current().mode {
            DetectorMode::FullRescan => "Telemetry started (Sync Mode)",
            DetectorMode::IncrementalTail => "Telemetry started (Watching Mode)",
        },
        StartOutcome::AlreadyRunning => "Already running",
    };
    Ok(CommandAck::new(message))
}

pub async fn stop_watch(state: &AppState) -> Result<CommandAck, String> {
    match state.watcher.stop().await.map_err(|e| e.to_string())? {
        StopOutcome::Stopped | StopOutcome::NotRunning => Ok(CommandAck::new("Telemetry stopped")),
    }
}

/// Full snapshot for a subscriber that just connected.
pub async fn list_records(state: &AppState) -> Result<Vec<TelemetryRecord>, String> {
    state.db.list_records().await.map_err(|e| e.to_string())
}
