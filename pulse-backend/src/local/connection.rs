use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use super::schema::SCHEMA;

/// SQLite in-memory database identifier
const MEMORY_DB_PATH: &str = ":memory:";

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Database wrapper with connection pooling support
#[derive(Clone)]
pub struct Database {
    pub pool: DbPool,
}

impl Database {
    /// Create a new database connection pool
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let trimmed_path = path_str.trim();

        // Every in-memory connection is its own database, so the pool must
        // hand out a single shared connection
        let pool = if trimmed_path.eq_ignore_ascii_case(MEMORY_DB_PATH) {
            Pool::builder()
                .max_size(1)
                .build(SqliteConnectionManager::memory())
        } else {
            Pool::new(SqliteConnectionManager::file(path.as_ref()))
        };
        let pool = pool.context("Failed to create database connection pool")?;

        Ok(Self { pool })
    }

    /// Create an in-memory database pool (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Self::new(MEMORY_DB_PATH)
    }

    /// Initialize the database schema
    pub fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn connection(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .context("Failed to get database connection from pool")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_initialize_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let conn = db.connection().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('profiles', 'posts', 'post_likes', 'notifications', 'search_queries', 'reports')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_file_database_persists() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("pulse.db");

        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        db.connection()
            .unwrap()
            .execute(
                "INSERT INTO search_queries (query, search_count, created_date) VALUES ('rust', 3, '2024-05-01')",
                [],
            )
            .unwrap();
        drop(db);

        let reopened = Database::new(&path).unwrap();
        let count: i64 = reopened
            .connection()
            .unwrap()
            .query_row("SELECT search_count FROM search_queries WHERE query = 'rust'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
