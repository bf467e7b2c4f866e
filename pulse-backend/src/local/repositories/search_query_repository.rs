use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;

use pulse_types::{NewSearchQuery, SearchQuery, TrendingTopic};

use super::{day, day_at};
use crate::local::DbPool;

/// Day-bucketed search counters
pub struct SearchQueryRepository {
    pool: DbPool,
}

impl SearchQueryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Bucket for `query` on `on`
    pub fn find(&self, query: &str, on: NaiveDate) -> Result<Option<SearchQuery>> {
        let conn = self.pool.get()?;
        let entry = conn
            .query_row(
                "SELECT id, query, search_count, created_date FROM search_queries
                 WHERE query = ? AND created_date = ?",
                (query, day(on)),
                |row| {
                    Ok(SearchQuery {
                        id: row.get(0)?,
                        query: row.get(1)?,
                        search_count: row.get(2)?,
                        created_date: day_at(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn create(&self, entry: &NewSearchQuery) -> Result<SearchQuery> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO search_queries (query, search_count, created_date) VALUES (?, ?, ?)",
            (&entry.query, entry.search_count, day(entry.created_date)),
        )
        .context("Failed to create search query")?;

        Ok(SearchQuery {
            id: conn.last_insert_rowid(),
            query: entry.query.clone(),
            search_count: entry.search_count,
            created_date: entry.created_date,
        })
    }

    pub fn set_count(&self, id: i64, search_count: i64) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE search_queries SET search_count = ? WHERE id = ?",
                (search_count, id),
            )
            .context("Failed to update search count")?;
        Ok(changed > 0)
    }

    /// Buckets from `min_day` on with at least `min_count` searches, highest first
    pub fn top(&self, min_count: i64, min_day: NaiveDate, limit: usize) -> Result<Vec<TrendingTopic>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT query, search_count, created_date FROM search_queries
             WHERE search_count >= ? AND created_date >= ?
             ORDER BY search_count DESC, query ASC
             LIMIT ?",
        )?;
        let topics = stmt
            .query_map((min_count, day(min_day), limit as i64), |row| {
                Ok(TrendingTopic {
                    query: row.get(0)?,
                    search_count: row.get(1)?,
                    created_date: day_at(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    /// Drop buckets older than `before`. Returns how many were removed.
    pub fn delete_before(&self, before: NaiveDate) -> Result<usize> {
        let conn = self.pool.get()?;
        let deleted = conn
            .execute(
                "DELETE FROM search_queries WHERE created_date < ?",
                [day(before)],
            )
            .context("Failed to delete old search queries")?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Database;

    fn repo() -> SearchQueryRepository {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        SearchQueryRepository::new(db.pool)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn bucket(query: &str, count: i64, on: NaiveDate) -> NewSearchQuery {
        NewSearchQuery {
            query: query.to_string(),
            search_count: count,
            created_date: on,
        }
    }

    #[test]
    fn test_buckets_are_per_day() {
        let repo = repo();
        let first = repo.create(&bucket("rust", 1, date(1))).unwrap();
        repo.create(&bucket("rust", 1, date(2))).unwrap();

        repo.set_count(first.id, 41).unwrap();
        assert_eq!(repo.find("rust", date(1)).unwrap().unwrap().search_count, 41);
        assert_eq!(repo.find("rust", date(2)).unwrap().unwrap().search_count, 1);
        assert!(repo.find("rust", date(3)).unwrap().is_none());
    }

    #[test]
    fn test_top_filters_and_orders() {
        let repo = repo();
        repo.create(&bucket("rust", 1500, date(2))).unwrap();
        repo.create(&bucket("go", 2500, date(2))).unwrap();
        repo.create(&bucket("zig", 999, date(2))).unwrap();
        repo.create(&bucket("old", 9000, date(1))).unwrap();

        let top = repo.top(1000, date(2), 10).unwrap();
        let queries: Vec<_> = top.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["go", "rust"]);

        assert_eq!(repo.top(1000, date(2), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_before() {
        let repo = repo();
        repo.create(&bucket("a", 1, date(1))).unwrap();
        repo.create(&bucket("b", 1, date(2))).unwrap();
        repo.create(&bucket("c", 1, date(3))).unwrap();

        assert_eq!(repo.delete_before(date(3)).unwrap(), 2);
        assert!(repo.find("c", date(3)).unwrap().is_some());
    }
}
