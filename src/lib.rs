mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod settings;
pub mod sync;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

pub use db::Database;
use settings::{parse_mode, SettingsStore};
use sync::{
    commands::{list_records, start_watch, stop_watch},
    EventPublisher, WatchController,
};

pub struct AppState {
    pub db: Database,
    pub watcher: WatchController,
    pub publisher: EventPublisher,
    pub settings: Arc<SettingsStore>,
}

impl AppState {
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let current = settings.current();
        let db = Database::new(current.database_path.clone())?;
        let publisher = EventPublisher::new(current.event_buffer);
        let watcher = WatchController::new(db.clone(), publisher.clone(), settings.clone());
        Ok(Self {
            db,
            watcher,
            publisher,
            settings,
        })
    }
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("telemetry-sync starting up...");

    let result = (|| -> Result<()> {
        let settings = Arc::new(SettingsStore::new(SettingsStore::default_path())?);
        info!("settings loaded from {}", settings.path().display());
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;
        runtime.block_on(async move {
            let state = AppState::new(settings)?;
            serve(state).await
        })
    })();

    if let Err(err) = result {
        error!("telemetry-sync exited with error: {err:#}");
        std::process::exit(1);
    }
}

/// Line-oriented control loop. Commands come in on stdin; every published
/// event goes out on stdout as one JSON object per line.
async fn serve(state: AppState) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut events = state.publisher.subscribe();
    let mut commands = BufReader::new(tokio::io::stdin()).lines();

    // A new subscriber pulls the full snapshot first.
    let snapshot = list_records(&state).await.map_err(anyhow::Error::msg)?;
    write_json(
        &mut stdout,
        &serde_json::json!({ "event": "telemetry_snapshot", "payload": snapshot }),
    )
    .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => write_json(&mut stdout, &event).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event consumer lagged, {skipped} event(s) dropped");
                }
                Err(RecvError::Closed) => break,
            },
            line = commands.next_line() => {
                let Some(line) = line.context("failed to read command")? else {
                    break;
                };
                if !handle_command(&state, line.trim(), &mut stdout).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(err) = stop_watch(&state).await {
        error!("Failed to stop watcher on shutdown: {err}");
    }
    Ok(())
}

async fn handle_command(
    state: &AppState,
    command: &str,
    stdout: &mut tokio::io::Stdout,
) -> Result<bool> {
    let mut words = command.split_whitespace();
    let reply = match (words.next(), words.next()) {
        (None, _) => return Ok(true),
        (Some("quit") | Some("exit"), _) => return Ok(false),
        (Some("start"), _) => serde_json::to_value(start_watch(state).await),
        (Some("stop"), _) => serde_json::to_value(stop_watch(state).await),
        (Some("list"), _) => serde_json::to_value(list_records(state).await),
        (Some("mode"), Some(raw)) => {
            let outcome = parse_mode(raw).and_then(|mode| {
                let mut settings = state.settings.current();
                settings.mode = mode;
                state.settings.update(settings)?;
                Ok(format!("mode set to {}; applies on next start", mode.as_str()))
            });
            serde_json::to_value(outcome.map_err(|e| e.to_string()))
        }
        (Some(other), _) => serde_json::to_value(Err::<(), _>(format!("unknown command '{other}'"))),
    }
    .context("failed to encode command reply")?;

    write_json(stdout, &serde_json::json!({ "reply": reply })).await?;
    Ok(true)
}

async fn write_json<T: serde::Serialize>(stdout: &mut tokio::io::Stdout, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value).context("failed to encode output")?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
