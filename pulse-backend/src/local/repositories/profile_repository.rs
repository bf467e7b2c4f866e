use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use pulse_types::{Profile, ProfileUpdate};

use super::{like_pattern, timestamp, timestamp_at, uuid_at};
use crate::local::DbPool;

const PROFILE_COLUMNS: &str = "id, username, display_name, bio, avatar_url, is_verified, is_admin, is_banned,
    followers_count, following_count, posts_count, likes_count, created_at";

fn map_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        bio: row.get(3)?,
        avatar_url: row.get(4)?,
        is_verified: row.get(5)?,
        is_admin: row.get(6)?,
        is_banned: row.get(7)?,
        followers_count: row.get(8)?,
        following_count: row.get(9)?,
        posts_count: row.get(10)?,
        likes_count: row.get(11)?,
        created_at: Some(timestamp_at(row, 12)?),
    })
}

pub struct ProfileRepository {
    pool: DbPool,
}

impl ProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get profile by ID
    pub fn get_by_id(&self, id: &Uuid) -> Result<Option<Profile>> {
        let conn = self.pool.get()?;
        let profile = conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS),
                [id.to_string()],
                map_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Get profile by username
    pub fn get_by_username(&self, username: &str) -> Result<Option<Profile>> {
        let conn = self.pool.get()?;
        let profile = conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE username = ? LIMIT 1", PROFILE_COLUMNS),
                [username],
                map_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Insert a profile row, stamping `created_at` if unset
    pub fn create(&self, profile: &Profile) -> Result<Profile> {
        let conn = self.pool.get()?;
        let mut created = profile.clone();
        let created_at = *created.created_at.get_or_insert_with(Utc::now);

        conn.execute(
            "INSERT INTO profiles (id, username, display_name, bio, avatar_url, is_verified, is_admin, is_banned,
                                   followers_count, following_count, posts_count, likes_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                created.id.to_string(),
                &created.username,
                &created.display_name,
                &created.bio,
                &created.avatar_url,
                created.is_verified,
                created.is_admin,
                created.is_banned,
                created.followers_count,
                created.following_count,
                created.posts_count,
                created.likes_count,
                timestamp(&created_at),
            ),
        )
        .context("Failed to create profile")?;

        Ok(created)
    }

    /// Apply a partial update. Returns the updated row, or `None` if no row matched.
    pub fn update(&self, id: &Uuid, update: &ProfileUpdate) -> Result<Option<Profile>> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(username) = &update.username {
            assignments.push("username = ?");
            params.push(Value::Text(username.clone()));
        }
        if let Some(display_name) = &update.display_name {
            assignments.push("display_name = ?");
            params.push(Value::Text(display_name.clone()));
        }
        if let Some(bio) = &update.bio {
            assignments.push("bio = ?");
            params.push(Value::Text(bio.clone()));
        }
        if let Some(avatar_url) = &update.avatar_url {
            assignments.push("avatar_url = ?");
            params.push(Value::Text(avatar_url.clone()));
        }
        if let Some(is_verified) = update.is_verified {
            assignments.push("is_verified = ?");
            params.push(Value::Integer(is_verified as i64));
        }
        if let Some(is_banned) = update.is_banned {
            assignments.push("is_banned = ?");
            params.push(Value::Integer(is_banned as i64));
        }

        if !assignments.is_empty() {
            params.push(Value::Text(id.to_string()));
            let conn = self.pool.get()?;
            let changed = conn
                .execute(
                    &format!("UPDATE profiles SET {} WHERE id = ?", assignments.join(", ")),
                    rusqlite::params_from_iter(params.iter()),
                )
                .context("Failed to update profile")?;
            if changed == 0 {
                return Ok(None);
            }
        }

        self.get_by_id(id)
    }

    /// Delete a profile. Returns whether a row was removed.
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let deleted = conn
            .execute("DELETE FROM profiles WHERE id = ?", [id.to_string()])
            .context("Failed to delete profile")?;
        Ok(deleted > 0)
    }

    /// Newest profiles first
    pub fn list(&self, limit: usize) -> Result<Vec<Profile>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM profiles ORDER BY created_at DESC, rowid DESC LIMIT ?",
            PROFILE_COLUMNS
        ))?;
        let profiles = stmt
            .query_map([limit as i64], map_profile)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    pub fn list_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM profiles")?;
        let ids = stmt
            .query_map([], |row| uuid_at(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Substring match on username or display name (ASCII case-insensitive)
    pub fn search(&self, term: &str, limit: usize) -> Result<Vec<Profile>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM profiles
             WHERE display_name LIKE ?1 ESCAPE '\\' OR username LIKE ?1 ESCAPE '\\'
             ORDER BY username
             LIMIT ?2",
            PROFILE_COLUMNS
        ))?;
        let profiles = stmt
            .query_map((like_pattern(term), limit as i64), map_profile)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    pub fn count(&self, verified_only: bool) -> Result<u64> {
        let conn = self.pool.get()?;
        let sql = if verified_only {
            "SELECT COUNT(*) FROM profiles WHERE is_verified = 1"
        } else {
            "SELECT COUNT(*) FROM profiles"
        };
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Grant or revoke the admin flag
    pub fn set_admin(&self, id: &Uuid, is_admin: bool) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE profiles SET is_admin = ? WHERE id = ?",
                (is_admin, id.to_string()),
            )
            .context("Failed to update admin flag")?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Database;
    use pulse_types::{AuthUser, UserMetadata};

    fn repo() -> ProfileRepository {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        ProfileRepository::new(db.pool)
    }

    fn profile(email: &str, name: &str) -> Profile {
        Profile::for_user(&AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: UserMetadata {
                full_name: Some(name.to_string()),
                avatar_url: None,
            },
        })
    }

    #[test]
    fn test_create_and_get() {
        let repo = repo();
        let created = repo.create(&profile("ada@example.com", "Ada Lovelace")).unwrap();
        assert!(created.created_at.is_some());

        let fetched = repo.get_by_id(&created.id).unwrap().unwrap();
        assert_eq!(fetched.username, "ada");
        assert_eq!(fetched.display_name, "Ada Lovelace");
        assert_eq!(repo.get_by_username("ada").unwrap().unwrap().id, created.id);
    }

    #[test]
    fn test_partial_update() {
        let repo = repo();
        let created = repo.create(&profile("ada@example.com", "Ada")).unwrap();

        let updated = repo
            .update(
                &created.id,
                &ProfileUpdate {
                    bio: Some("Analyst".to_string()),
                    is_verified: Some(true),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.bio.as_deref(), Some("Analyst"));
        assert!(updated.is_verified);
        assert_eq!(updated.display_name, "Ada");

        let missing = repo
            .update(&Uuid::new_v4(), &ProfileUpdate { bio: Some("x".into()), ..Default::default() })
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_search_and_count() {
        let repo = repo();
        repo.create(&profile("ada@example.com", "Ada Lovelace")).unwrap();
        let grace = repo.create(&profile("grace@example.com", "Grace Hopper")).unwrap();
        repo.update(&grace.id, &ProfileUpdate { is_verified: Some(true), ..Default::default() })
            .unwrap();

        let found = repo.search("HOPPER", 20).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, grace.id);
        assert_eq!(repo.search("a", 20).unwrap().len(), 2);

        assert_eq!(repo.count(false).unwrap(), 2);
        assert_eq!(repo.count(true).unwrap(), 1);
        assert_eq!(repo.list_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_delete() {
        let repo = repo();
        let created = repo.create(&profile("ada@example.com", "Ada")).unwrap();
        assert!(repo.delete(&created.id).unwrap());
        assert!(!repo.delete(&created.id).unwrap());
        assert!(repo.get_by_id(&created.id).unwrap().is_none());
    }
}
