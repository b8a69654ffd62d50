use std::path::Path;

use rusqlite::{params, Connection};

use mendkit_recon::{AuditEvent, AuditSink, RunMode};

use crate::error::SqliteStoreError;
use crate::sqlite::{record_id, sql_id, SCHEMA};

/// Appends audit events to the `audit_log` table.
///
/// Holds its own connection so it can sit next to a [`SqliteStore`](crate::SqliteStore)
/// on the same file.
pub struct SqliteAuditLog {
    conn: Connection,
    failures: usize,
}

impl SqliteAuditLog {
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, failures: 0 })
    }

    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, failures: 0 })
    }

    /// Events that could not be written.
    pub fn failures(&self) -> usize {
        self.failures
    }

    fn append(&self, event: &AuditEvent) -> Result<(), SqliteStoreError> {
        self.conn.execute(
            "INSERT INTO audit_log (recorded_at, job, dataset, record_id, mode, category, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chrono::Utc::now().to_rfc3339(),
                event.job,
                event.dataset,
                sql_id(event.id)?,
                event.mode.to_string(),
                event.category,
                event.detail,
            ],
        )?;
        Ok(())
    }

    /// Events recorded for `job`, oldest first.
    pub fn events(&self, job: &str) -> Result<Vec<AuditEvent>, SqliteStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT job, dataset, record_id, mode, category, detail
             FROM audit_log WHERE job = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![job], |row| {
            let mode: String = row.get(3)?;
            Ok(AuditEvent {
                job: row.get(0)?,
                dataset: row.get(1)?,
                id: record_id(row.get(2)?),
                mode: if mode == "preview" {
                    RunMode::Preview
                } else {
                    RunMode::Execute
                },
                category: row.get(4)?,
                detail: row.get(5)?,
            })
        })?;
        let events = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

impl AuditSink for SqliteAuditLog {
    fn record(&mut self, event: &AuditEvent) {
        // An audit write failing must not fail the candidate it describes.
        if let Err(e) = self.append(event) {
            self.failures += 1;
            tracing::warn!(job = %event.job, id = %event.id, error = %e, "audit event not written");
        }
    }
}
