use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    ingest::{ChangeDetector, SourceFile},
    settings::{SettingsStore, SyncSettings},
};

use super::{
    publisher::EventPublisher,
    reconcile::ReconciliationEngine,
    scan_worker::{scan_loop, ScanSignal, ScanWorker},
    state::{PendingScan, ScanStats, WatchState, WatchStatus},
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StartOutcome {
    Started { generation: u64 },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct WatchSession {
    cancel_token: CancellationToken,
    signal_tx: mpsc::UnboundedSender<ScanSignal>,
    handle: JoinHandle<()>,
    // Dropping the watcher deregisters the OS watch.
    fs_watcher: Option<RecommendedWatcher>,
}

struct ControllerInner {
    state: WatchState,
    session: Option<WatchSession>,
}

/// Owns the Idle/Running lifecycle for one watched source. Cloning shares
/// the same controller.
#[derive(Clone)]
pub struct WatchController {
    inner: Arc<Mutex<ControllerInner>>,
    db: Database,
    publisher: EventPublisher,
    settings: Arc<SettingsStore>,
    stats_tx: Arc<watch::Sender<ScanStats>>,
}

impl WatchController {
    pub fn new(db: Database, publisher: EventPublisher, settings: Arc<SettingsStore>) -> Self {
        let (stats_tx, _) = watch::channel(ScanStats::default());
        Self {
            inner: Arc::new(Mutex::new(ControllerInner {
                state: WatchState::new(),
                session: None,
            })),
            db,
            publisher,
            settings,
            stats_tx: Arc::new(stats_tx),
        }
    }

    pub async fn status(&self) -> WatchStatus {
        self.inner.lock().await.state.status
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<ScanStats> {
        self.stats_tx.subscribe()
    }

    /// `Idle → Running`. Spawns the scan worker, which scans once right away
    /// and then on debounced change signals. Calling this while running
    /// changes nothing.
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let settings = self.settings.current();
        let generation = inner.state.begin(Utc::now());
        self.stats_tx.send_modify(|stats| stats.generation = generation);

        let cancel_token = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        // Watch before the initial scan so a write landing during it still
        // produces a follow-up scan.
        let fs_watcher = if settings.watch_fs_events {
            match spawn_fs_watcher(&settings.source_path, signal_tx.clone()) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!("File change notifications unavailable, scanning on demand only: {err:#}");
                    None
                }
            }
        } else {
            None
        };

        let worker = self.build_worker(generation, &settings);
        let handle = tokio::spawn(scan_loop(worker, signal_rx, cancel_token.clone()));

        inner.session = Some(WatchSession {
            cancel_token,
            signal_tx,
            handle,
            fs_watcher,
        });

        info!(
            "Process started ({} mode, generation {generation})",
            settings.mode.as_str()
        );
        Ok(StartOutcome::Started { generation })
    }

    /// `Running → Idle`. The state flips first, then the worker is cancelled
    /// and awaited, so nothing from this generation lands after return.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_running() {
            return Ok(StopOutcome::NotRunning);
        }
        inner.state.end();

        if let Some(session) = inner.session.take() {
            session.cancel_token.cancel();
            drop(session.fs_watcher);
            drop(session.signal_tx);
            if let Err(err) = session.handle.await {
                error!("Scan worker failed to join: {err}");
            }
        }

        info!("Process stopped");
        Ok(StopOutcome::Stopped)
    }

    /// Feeds a change signal to the running worker. Returns `false` when
    /// idle, in which case the signal is dropped.
    pub async fn notify_file_changed(&self) -> bool {
        let inner = self.inner.lock().await;
        match &inner.session {
            Some(session) if inner.state.is_running() => {
                session.signal_tx.send(ScanSignal::FileChanged).is_ok()
            }
            _ => false,
        }
    }

    fn build_worker(&self, generation: u64, settings: &SyncSettings) -> ScanWorker {
        ScanWorker::new(
            generation,
            SourceFile::new(settings.source_path.clone()),
            ChangeDetector::new(settings.mode, settings.suppress_unchanged),
            ReconciliationEngine::new(self.db.clone()),
            self.publisher.clone(),
            Arc::clone(&self.stats_tx),
            PendingScan::new(settings.debounce()),
        )
    }
}

/// Watches the source's directory (not the file itself, so a file replaced
/// by rename is still seen) and forwards events for the source file name.
fn spawn_fs_watcher(
    source_path: &Path,
    signal_tx: mpsc::UnboundedSender<ScanSignal>,
) -> Result<RecommendedWatcher> {
    let file_name: OsString = source_path
        .file_name()
        .map(|name| name.to_os_string())
        .with_context(|| format!("{} has no file name", source_path.display()))?;
    let directory: PathBuf = match source_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(
        move |res: std::result::Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Any | EventKind::Create(_) | EventKind::Modify(_)
                );
                let ours = event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(file_name.as_os_str()));
                if relevant && ours {
                    let _ = signal_tx.send(ScanSignal::FileChanged);
                }
            }
            Err(err) => warn!("filesystem watcher error: {err}"),
        },
    )
    .context("failed to create filesystem watcher")?;

    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", directory.display()))?;

    Ok(watcher)
}
