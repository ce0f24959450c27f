//! Cache generation storage.
//!
//! A generation is a named collection of request-to-response entries. Entries
//! are upserted (last write wins) and a generation is dropped as a whole when a
//! newer deployment supersedes it.

use super::connection::WorkerDb;
use crate::Error;
use crate::exchange::Response;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Role a generation plays for the current deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationRole {
    Static,
    Dynamic,
}

impl GenerationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationRole::Static => "static",
            GenerationRole::Dynamic => "dynamic",
        }
    }
}

/// A response read back from a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub url: String,
    pub response: Response,
    pub stored_at: String,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl WorkerDb {
    /// Register a generation. Opening an existing generation is a no-op.
    pub async fn create_generation(&self, name: &str, role: GenerationRole) -> Result<(), Error> {
        let name = name.to_string();
        let created_at = now();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO cache_generations (name, role, created_at) VALUES (?1, ?2, ?3)",
                    params![name, role.as_str(), created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every stored generation, sorted.
    pub async fn generation_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM cache_generations ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if no generation had that name.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE generation = ?1", params![name])?;
                let deleted = tx.execute("DELETE FROM cache_generations WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up the entry stored under `request_key`.
    ///
    /// Returns None on a miss.
    pub async fn match_entry(&self, generation: &str, request_key: &str) -> Result<Option<CachedEntry>, Error> {
        let generation = generation.to_string();
        let request_key = request_key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, status, headers_json, body, stored_at
                     FROM cache_entries WHERE generation = ?1 AND request_key = ?2",
                )?;

                let result = stmt.query_row(params![generation, request_key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                });

                match result {
                    Ok((url, status, headers_json, body, stored_at)) => {
                        let headers = serde_json::from_str(&headers_json)?;
                        Ok(Some(CachedEntry { url, response: Response { status, headers, body }, stored_at }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Store `response` under `request_key`, replacing any earlier entry.
    ///
    /// The generation is registered on first use.
    pub async fn put_entry(
        &self, generation: &str, role: GenerationRole, request_key: &str, method: &str, url: &str,
        response: &Response,
    ) -> Result<(), Error> {
        let generation = generation.to_string();
        let request_key = request_key.to_string();
        let method = method.to_ascii_uppercase();
        let url = url.to_string();
        let status = response.status;
        let headers_json = serde_json::to_string(&response.headers)?;
        let body = response.body.clone();
        let stored_at = now();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_generations (name, role, created_at) VALUES (?1, ?2, ?3)",
                    params![generation, role.as_str(), stored_at],
                )?;
                tx.execute(
                    "INSERT INTO cache_entries (
                        generation, request_key, method, url, status, headers_json, body, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(generation, request_key) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![generation, request_key, method, url, status, headers_json, body, stored_at],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries stored in a generation.
    pub async fn entry_count(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Evict the oldest entries until at most `max_entries` remain.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_generation(&self, generation: &str, max_entries: usize) -> Result<u64, Error> {
        let generation = generation.to_string();
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE generation = ?1 AND request_key IN (
                        SELECT request_key FROM cache_entries WHERE generation = ?1
                        ORDER BY stored_at ASC, rowid ASC LIMIT ?2
                    )",
                    params![generation, to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
