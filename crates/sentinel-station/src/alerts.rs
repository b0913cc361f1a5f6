//! SQLite-backed alert log.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use sentinel_core::{AlertRecord, AlertSink, AlertStatus, SinkError};
use std::path::Path;
use tokio_rusqlite::Connection;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id                  TEXT PRIMARY KEY,
    identity_id         TEXT NOT NULL,
    display_name        TEXT NOT NULL,
    contact_email       TEXT NOT NULL,
    reference_image_ref TEXT NOT NULL,
    distance            REAL NOT NULL,
    confidence          INTEGER NOT NULL,
    scanned_by          TEXT NOT NULL,
    station             TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'new'
);
CREATE INDEX IF NOT EXISTS alerts_created_at ON alerts (created_at);
";

pub struct SqliteAlertSink {
    conn: Connection,
}

fn storage(e: tokio_rusqlite::Error) -> SinkError {
    SinkError::Storage(e.to_string())
}

fn conversion(
    column: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, e.into())
}

impl SqliteAlertSink {
    /// Open (creating if needed) the alert database at `path`.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let sink = Self { conn };
        sink.migrate().await?;
        tracing::debug!(path = %path.display(), "alert database ready");
        Ok(sink)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let sink = Self { conn };
        sink.migrate().await?;
        Ok(sink)
    }

    async fn migrate(&self) -> Result<(), SinkError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(storage)
    }

    /// Most recent alerts first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>, SinkError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity_id, display_name, contact_email, reference_image_ref,
                            distance, confidence, scanned_by, station, created_at, status
                     FROM alerts ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    let id: String = row.get(0)?;
                    let created_at: String = row.get(9)?;
                    let status: String = row.get(10)?;
                    Ok(AlertRecord {
                        id: Uuid::parse_str(&id).map_err(|e| conversion(0, e))?,
                        identity_id: row.get(1)?,
                        display_name: row.get(2)?,
                        contact_email: row.get(3)?,
                        reference_image_ref: row.get(4)?,
                        distance: row.get(5)?,
                        confidence: row.get(6)?,
                        scanned_by: row.get(7)?,
                        station: row.get(8)?,
                        created_at: DateTime::parse_from_rfc3339(&created_at)
                            .map_err(|e| conversion(9, e))?
                            .with_timezone(&Utc),
                        status: AlertStatus::parse(&status)
                            .ok_or_else(|| conversion(10, format!("unknown status {status:?}")))?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(storage)
    }
}

#[async_trait]
impl AlertSink for SqliteAlertSink {
    async fn record(&self, alert: &AlertRecord) -> Result<(), SinkError> {
        let alert = alert.clone();
        let id = alert.id;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO alerts (id, identity_id, display_name, contact_email,
                        reference_image_ref, distance, confidence, scanned_by, station,
                        created_at, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        alert.id.to_string(),
                        alert.identity_id,
                        alert.display_name,
                        alert.contact_email,
                        alert.reference_image_ref,
                        alert.distance,
                        alert.confidence,
                        alert.scanned_by,
                        alert.station,
                        alert.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                        alert.status.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(storage)?;
        tracing::info!(alert = %id, "alert recorded");
        Ok(())
    }
}
