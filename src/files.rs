//! File metadata recorder over the `minio_files` table.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::warn;

use crate::db::DbConnection;
use crate::models::FileRecord;

/// Backoff schedule for the metadata insert that follows a successful
/// object store write.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Clone)]
pub struct FileStore {
    conn: DbConnection,
    retry: RetryPolicy,
}

impl FileStore {
    pub fn new(conn: DbConnection) -> Self {
        Self::with_retry(conn, RetryPolicy::default())
    }

    pub fn with_retry(conn: DbConnection, retry: RetryPolicy) -> Self {
        Self { conn, retry }
    }

    pub async fn create(
        &self,
        uid: i64,
        file_name: &str,
        file_url: &str,
    ) -> Result<FileRecord, rusqlite::Error> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO minio_files (uid, file_name, file_url, created_at) VALUES (?, ?, ?, ?)",
            params![uid, file_name, file_url, now.to_rfc3339()],
        )?;

        Ok(FileRecord {
            id: conn.last_insert_rowid(),
            uid,
            file_name: file_name.to_string(),
            file_url: file_url.to_string(),
            created_at: now,
        })
    }

    /// `create`, retried with exponential backoff. Returns the last error once
    /// the attempts are exhausted.
    pub async fn record(
        &self,
        uid: i64,
        file_name: &str,
        file_url: &str,
    ) -> Result<FileRecord, rusqlite::Error> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.create(uid, file_name, file_url).await {
                Ok(record) => return Ok(record),
                Err(err) if attempt < self.retry.attempts => {
                    warn!(
                        uid,
                        file_name,
                        attempt,
                        error = %err,
                        "metadata insert failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// All records owned by `uid`, oldest first.
    pub async fn list_for_user(&self, uid: i64) -> Result<Vec<FileRecord>, rusqlite::Error> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, uid, file_name, file_url, created_at FROM minio_files WHERE uid = ? ORDER BY id",
        )?;

        let rows = stmt.query_map([uid], |row| {
            let created_at: String = row.get(4)?;
            Ok(FileRecord {
                id: row.get(0)?,
                uid: row.get(1)?,
                file_name: row.get(2)?,
                file_url: row.get(3)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(
                            4,
                            rusqlite::types::Type::Text,
                            Box::new(err),
                        )
                    })?,
            })
        })?;

        rows.collect()
    }
}
