use anyhow::{Context, Result};

use pulse_types::{ProfileSummary, Report};

use super::{opt_uuid_at, timestamp, timestamp_at, uuid_at};
use crate::local::DbPool;

pub struct ReportRepository {
    pool: DbPool,
}

impl ReportRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Newest reports first, with the reporter summary joined in
    pub fn list(&self, limit: usize) -> Result<Vec<Report>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.reported_by, r.post_id, r.reported_user_id, r.reason, r.created_at,
                    p.id, p.username, p.display_name, p.avatar_url, p.is_verified
             FROM reports r
             LEFT JOIN profiles p ON p.id = r.reported_by
             ORDER BY r.created_at DESC, r.rowid DESC
             LIMIT ?",
        )?;
        let reports = stmt
            .query_map([limit as i64], |row| {
                let reporter = match opt_uuid_at(row, 6)? {
                    Some(id) => Some(ProfileSummary {
                        id: Some(id),
                        username: row.get(7)?,
                        display_name: row.get(8)?,
                        avatar_url: row.get(9)?,
                        is_verified: row.get(10)?,
                    }),
                    None => None,
                };
                Ok(Report {
                    id: uuid_at(row, 0)?,
                    reported_by: uuid_at(row, 1)?,
                    post_id: opt_uuid_at(row, 2)?,
                    reported_user_id: opt_uuid_at(row, 3)?,
                    reason: row.get(4)?,
                    created_at: timestamp_at(row, 5)?,
                    reporter,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    pub fn create(&self, report: &Report) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO reports (id, reported_by, post_id, reported_user_id, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                report.id.to_string(),
                report.reported_by.to_string(),
                report.post_id.map(|id| id.to_string()),
                report.reported_user_id.map(|id| id.to_string()),
                &report.reason,
                timestamp(&report.created_at),
            ),
        )
        .context("Failed to create report")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::repositories::ProfileRepository;
    use crate::local::Database;
    use chrono::{Duration, Utc};
    use pulse_types::{AuthUser, Profile, UserMetadata};
    use uuid::Uuid;

    #[test]
    fn test_list_with_reporter() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let repo = ReportRepository::new(db.pool.clone());
        let reporter = ProfileRepository::new(db.pool)
            .create(&Profile::for_user(&AuthUser {
                id: Uuid::new_v4(),
                email: Some("watchful@example.com".to_string()),
                user_metadata: UserMetadata::default(),
            }))
            .unwrap();

        for (reason, minutes_ago) in [("spam", 10), ("abuse", 1)] {
            repo.create(&Report {
                id: Uuid::new_v4(),
                reported_by: reporter.id,
                post_id: Some(Uuid::new_v4()),
                reported_user_id: None,
                reason: reason.to_string(),
                created_at: Utc::now() - Duration::minutes(minutes_ago),
                reporter: None,
            })
            .unwrap();
        }

        let reports = repo.list(50).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].reason, "abuse");
        assert_eq!(reports[0].reporter.as_ref().unwrap().username, "watchful");
        assert_eq!(repo.list(1).unwrap().len(), 1);
    }
}
