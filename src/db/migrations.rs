use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema steps in order. A store's `user_version` is the number of steps
/// already applied to it.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let applied = schema_version(conn)?;
    let known = MIGRATIONS.len() as i64;
    if applied > known {
        bail!("telemetry store is at schema {applied}, this build only knows {known}");
    }

    for (step, script) in MIGRATIONS.iter().enumerate().skip(applied.max(0) as usize) {
        let version = step as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(script)
            .with_context(|| format!("schema step {version} failed"))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()
            .with_context(|| format!("failed to commit schema step {version}"))?;
        info!("telemetry store migrated to schema {version}");
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read store schema version")
}
