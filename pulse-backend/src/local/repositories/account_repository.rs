use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use pulse_types::{AuthUser, UserMetadata};

use super::{timestamp, uuid_at};
use crate::local::DbPool;

const ACCOUNT_COLUMNS: &str = "a.id, a.email, a.full_name, a.avatar_url";

fn map_account(row: &rusqlite::Row) -> rusqlite::Result<AuthUser> {
    Ok(AuthUser {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        user_metadata: UserMetadata {
            full_name: row.get(2)?,
            avatar_url: row.get(3)?,
        },
    })
}

/// Accounts and access tokens of the development auth service
pub struct AccountRepository {
    pool: DbPool,
}

impl AccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get account by email (case-insensitive)
    pub fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM accounts a WHERE lower(a.email) = lower(?)", ACCOUNT_COLUMNS),
                [email],
                map_account,
            )
            .optional()?;
        Ok(user)
    }

    /// Create a new account
    pub fn create(&self, email: &str, full_name: Option<&str>) -> Result<AuthUser> {
        let conn = self.pool.get()?;
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: UserMetadata {
                full_name: full_name.map(str::to_string),
                avatar_url: None,
            },
        };

        conn.execute(
            "INSERT INTO accounts (id, email, full_name, avatar_url, created_at) VALUES (?, ?, ?, NULL, ?)",
            (
                user.id.to_string(),
                email,
                full_name,
                timestamp(&Utc::now()),
            ),
        )
        .context("Failed to create account")?;

        Ok(user)
    }

    /// Issue a new access token for the account
    pub fn create_session(&self, account_id: &Uuid) -> Result<String> {
        let conn = self.pool.get()?;
        let token = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO auth_sessions (token, account_id, created_at) VALUES (?, ?, ?)",
            (&token, account_id.to_string(), timestamp(&Utc::now())),
        )
        .context("Failed to create session")?;
        Ok(token)
    }

    /// Resolve an access token to its account
    pub fn find_by_session(&self, token: &str) -> Result<Option<AuthUser>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!(
                    "SELECT {} FROM auth_sessions s JOIN accounts a ON a.id = s.account_id WHERE s.token = ?",
                    ACCOUNT_COLUMNS
                ),
                [token],
                map_account,
            )
            .optional()?;
        Ok(user)
    }

    /// Revoke an access token
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM auth_sessions WHERE token = ?", [token])
            .context("Failed to delete session")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Database;

    fn repo() -> AccountRepository {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        AccountRepository::new(db.pool)
    }

    #[test]
    fn test_create_and_find_by_email() {
        let repo = repo();
        let created = repo.create("Ada@Example.com", Some("Ada")).unwrap();

        let found = repo.find_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.user_metadata.full_name.as_deref(), Some("Ada"));
        assert!(repo.find_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let repo = repo();
        let user = repo.create("grace@example.com", None).unwrap();
        let token = repo.create_session(&user.id).unwrap();

        assert_eq!(repo.find_by_session(&token).unwrap().unwrap().id, user.id);

        repo.delete_session(&token).unwrap();
        assert!(repo.find_by_session(&token).unwrap().is_none());
    }
}
