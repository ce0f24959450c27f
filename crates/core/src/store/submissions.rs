//! Durable submission queue storage.
//!
//! Submissions are append-only: ids are assigned by SQLite AUTOINCREMENT so
//! they increase monotonically and are never reused, and rows are only ever
//! deleted, never updated.

use super::connection::WorkerDb;
use crate::Error;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// A write operation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub id: i64,
    /// Opaque payload, replayed verbatim as the JSON request body.
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl WorkerDb {
    /// Append a submission to the queue.
    pub async fn insert_submission(&self, payload: &serde_json::Value) -> Result<QueuedSubmission, Error> {
        let payload = payload.clone();
        let payload_json = serde_json::to_string(&payload)?;
        let created_at = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn
            .call(move |conn| -> Result<QueuedSubmission, Error> {
                conn.execute(
                    "INSERT INTO submissions (payload, created_at) VALUES (?1, ?2)",
                    params![payload_json, created_at],
                )?;
                Ok(QueuedSubmission { id: conn.last_insert_rowid(), payload, created_at })
            })
            .await
            .map_err(Error::from)
    }

    /// Every pending submission in creation order.
    pub async fn pending_submissions(&self) -> Result<Vec<QueuedSubmission>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<QueuedSubmission>, Error> {
                let mut stmt = conn.prepare("SELECT id, payload, created_at FROM submissions ORDER BY id ASC")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, payload, created_at)| -> Result<QueuedSubmission, Error> {
                        Ok(QueuedSubmission { id, payload: serde_json::from_str(&payload)?, created_at })
                    })
                    .collect()
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a delivered submission.
    ///
    /// Returns false if it was already gone.
    pub async fn delete_submission(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM submissions WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of pending submissions.
    pub async fn submission_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM submissions", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
