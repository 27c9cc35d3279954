#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use rusqlite::functions::FunctionFlags;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};

use telemetry_sync::{
    ingest::DetectorMode,
    models::TelemetryRecord,
    settings::{SettingsStore, SyncSettings},
    sync::{ScanStats, TelemetryEvent},
    AppState, Database,
};

pub const TWO_ROWS: &str = "1,T1,20.5,A,1.0,50,2,OK,80\n2,T2,21.0,B,1.0,55,3,WARN,60\n";
pub const DEBOUNCE_MS: u64 = 100;

pub struct Harness {
    pub dir: TempDir,
    pub source: PathBuf,
    pub state: AppState,
}

impl Harness {
    pub fn new(mode: DetectorMode) -> Self {
        Self::with(|settings| settings.mode = mode)
    }

    pub fn with(configure: impl FnOnce(&mut SyncSettings)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("telemetry_data.txt");

        let mut settings = SyncSettings {
            source_path: source.clone(),
            database_path: dir.path().join("telemetry.sqlite3"),
            debounce_ms: DEBOUNCE_MS,
            watch_fs_events: false,
            ..SyncSettings::default()
        };
        configure(&mut settings);

        let settings_path = dir.path().join("telemetry-sync.json");
        std::fs::write(&settings_path, serde_json::to_string(&settings).unwrap()).unwrap();
        let store = SettingsStore::with_overrides(settings_path, |_| None).expect("settings");
        let state = AppState::new(Arc::new(store)).expect("app state");

        Self { dir, source, state }
    }

    pub fn write_source(&self, contents: &str) {
        std::fs::write(&self.source, contents).expect("write source");
    }

    pub fn append_source(&self, contents: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.source)
            .expect("open source");
        file.write_all(contents.as_bytes()).expect("append source");
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }
}

pub fn database(dir: &TempDir) -> Database {
    Database::new(dir.path().join("store.sqlite3")).expect("database")
}

pub fn record(id: i64, temperature: f64) -> TelemetryRecord {
    TelemetryRecord {
        id,
        timestamp: format!("T{id}"),
        temperature,
        position: "A".into(),
        pressure: 1.0,
        humidity: 50.0,
        velocity: 2.0,
        status: "OK".into(),
        battery_level: 80.0,
    }
}

pub fn ids(records: &[TelemetryRecord]) -> Vec<i64> {
    records.iter().map(|r| r.id).collect()
}

pub async fn wait_for_scans(rx: &mut watch::Receiver<ScanStats>, at_least: u64) -> ScanStats {
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|stats| stats.scans_completed >= at_least),
    )
    .await
    .expect("timed out waiting for scan")
    .expect("stats channel closed")
    .clone()
}

pub fn drain(rx: &mut broadcast::Receiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 4)).await;
}

/// Makes every insert into the store take `delay_ms`, so a scan stays in
/// flight long enough to act on it.
pub async fn slow_inserts(db: &Database, delay_ms: u64) {
    db.execute(move |tx| {
        tx.create_scalar_function("pause_ms", 1, FunctionFlags::SQLITE_UTF8, |ctx| {
            let ms: i64 = ctx.get(0)?;
            std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
            Ok(ms)
        })?;
        tx.execute_batch(&format!(
            "CREATE TRIGGER slow_insert BEFORE INSERT ON telemetry_data
             BEGIN SELECT pause_ms({delay_ms}); END;"
        ))?;
        Ok(())
    })
    .await
    .expect("slow inserts");
}
