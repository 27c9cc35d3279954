use std::{path::Path, sync::mpsc, thread, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// Other processes may read or write the same file; wait this long for
/// their locks before reporting a failed write.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Handle to the telemetry store.
///
/// The connection is opened and migrated on the caller's thread, then handed
/// to a dedicated `telemetry-db` thread that drains a job queue. Every job
/// runs inside its own immediate transaction, so a job either lands whole
/// or not at all. The thread exits once the last handle is dropped.
#[derive(Clone)]
pub struct Database {
    jobs: mpsc::Sender<Job>,
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let mut conn = open_store(db_path)?;
        run_migrations(&mut conn).context("failed to run database migrations")?;

        let (jobs, queue) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("telemetry-db".into())
            .spawn(move || {
                for job in queue {
                    job(&mut conn);
                }
                debug!("telemetry store closed");
            })
            .context("failed to spawn database worker thread")?;

        info!("Telemetry store ready at {}", db_path.display());
        Ok(Self { jobs })
    }

    /// Runs `task` on the store thread inside an immediate transaction. The
    /// transaction commits when `task` returns `Ok` and rolls back otherwise.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            if reply_tx.send(in_transaction(conn, task)).is_err() {
                error!("store caller went away before its reply");
            }
        });

        self.jobs
            .send(job)
            .map_err(|_| anyhow!("telemetry store thread is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("telemetry store thread dropped a reply"))?
    }
}

fn open_store(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    let journal: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to enable WAL mode")?;
    if !journal.eq_ignore_ascii_case("wal") {
        debug!("store kept journal mode {journal}");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    Ok(conn)
}

fn in_transaction<F, T>(conn: &mut Connection, task: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("failed to begin store transaction")?;
    let value = task(&tx)?;
    tx.commit().context("failed to commit store transaction")?;
    Ok(value)
}
