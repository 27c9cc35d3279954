use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{ids_to_json, reading_from_sql, reading_to_sql},
};
use crate::models::TelemetryRecord;

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    Ok(TelemetryRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        temperature: reading_from_sql(row.get(2)?),
        position: row.get(3)?,
        pressure: reading_from_sql(row.get(4)?),
        humidity: reading_from_sql(row.get(5)?),
        velocity: reading_from_sql(row.get(6)?),
        status: row.get(7)?,
        battery_level: reading_from_sql(row.get(8)?),
    })
}

impl Database {
    /// Every stored record, ordered by id ascending.
    pub async fn list_records(&self) -> Result<Vec<TelemetryRecord>> {
        self.execute(|tx| {
            let mut stmt = tx.prepare(
                "SELECT id, timestamp, temperature, position, pressure, humidity, velocity, status, battery_level
                 FROM telemetry_data
                 ORDER BY id ASC",
            )?;

            let rows = stmt.query_map([], record_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
    }

    /// Insert-or-replace in one statement, committed on its own so a later
    /// failure in the same delta leaves this row in place.
    pub async fn upsert_record(&self, record: &TelemetryRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |tx| {
            tx.execute(
                "INSERT INTO telemetry_data (id, timestamp, temperature, position, pressure, humidity, velocity, status, battery_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (id)
                 DO UPDATE SET
                     timestamp = excluded.timestamp,
                     temperature = excluded.temperature,
                     position = excluded.position,
                     pressure = excluded.pressure,
                     humidity = excluded.humidity,
                     velocity = excluded.velocity,
                     status = excluded.status,
                     battery_level = excluded.battery_level",
                params![
                    record.id,
                    record.timestamp,
                    reading_to_sql(record.temperature),
                    record.position,
                    reading_to_sql(record.pressure),
                    reading_to_sql(record.humidity),
                    reading_to_sql(record.velocity),
                    record.status,
                    reading_to_sql(record.battery_level),
                ],
            )
            .with_context(|| format!("failed to upsert telemetry record {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// Removes every row whose id is not in `keep` and returns the removed
    /// ids in ascending order. An empty `keep` clears the table.
    pub async fn delete_records_not_in(&self, keep: &[i64]) -> Result<Vec<i64>> {
        let keep_json = ids_to_json(keep)?;
        self.execute(move |tx| {
            let mut stmt = tx.prepare(
                "DELETE FROM telemetry_data
                 WHERE id NOT IN (SELECT value FROM json_each(?1))
                 RETURNING id",
            )?;

            let rows = stmt.query_map(params![keep_json], |row| row.get::<_, i64>(0))?;
            let mut removed = Vec::new();
            for row in rows {
                removed.push(row?);
            }
            removed.sort_unstable();
            Ok(removed)
        })
        .await
        .context("failed to delete stale telemetry records")
    }

    pub async fn count_records(&self) -> Result<u64> {
        self.execute(|tx| {
            let count: i64 =
                tx.query_row("SELECT COUNT(*) FROM telemetry_data", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
