use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;

use super::timestamp;
use crate::local::DbPool;

/// Blob store standing in for hosted object storage
pub struct ObjectRepository {
    pool: DbPool,
}

impl ObjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store an object, replacing any previous one at the same path
    pub fn put(&self, bucket: &str, path: &str, data: &[u8], content_type: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO storage_objects (bucket, path, content_type, data, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (bucket, path, content_type, data, timestamp(&Utc::now())),
        )
        .context("Failed to store object")?;
        Ok(())
    }

    /// Content type and bytes of a stored object
    pub fn get(&self, bucket: &str, path: &str) -> Result<Option<(String, Vec<u8>)>> {
        let conn = self.pool.get()?;
        let object = conn
            .query_row(
                "SELECT content_type, data FROM storage_objects WHERE bucket = ? AND path = ?",
                (bucket, path),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(object)
    }
}
