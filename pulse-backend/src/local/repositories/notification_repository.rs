use anyhow::{Context, Result};
use rusqlite::types::Type;
use uuid::Uuid;

use pulse_types::{NewNotification, Notification, NotificationKind, ProfileSummary};

use super::{opt_uuid_at, timestamp, timestamp_at, uuid_at};
use crate::local::DbPool;

fn map_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let raw_kind: String = row.get(3)?;
    let kind = NotificationKind::parse(&raw_kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown notification type '{}'", raw_kind).into(),
        )
    })?;

    let sender = match opt_uuid_at(row, 8)? {
        Some(sender_id) => Some(ProfileSummary {
            id: Some(sender_id),
            username: row.get(9)?,
            display_name: row.get(10)?,
            avatar_url: row.get(11)?,
            is_verified: row.get(12)?,
        }),
        None => None,
    };

    Ok(Notification {
        id: uuid_at(row, 0)?,
        recipient_id: uuid_at(row, 1)?,
        sender_id: opt_uuid_at(row, 2)?,
        kind,
        content: row.get(4)?,
        related_id: opt_uuid_at(row, 5)?,
        is_read: row.get(6)?,
        created_at: timestamp_at(row, 7)?,
        sender,
    })
}

pub struct NotificationRepository {
    pool: DbPool,
}

impl NotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Newest notifications of a recipient, with the sender summary joined in
    pub fn list_for_recipient(&self, recipient_id: &Uuid, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.recipient_id, n.sender_id, n.type, n.content, n.related_id, n.is_read, n.created_at,
                    s.id, s.username, s.display_name, s.avatar_url, s.is_verified
             FROM notifications n
             LEFT JOIN profiles s ON s.id = n.sender_id
             WHERE n.recipient_id = ?
             ORDER BY n.created_at DESC, n.rowid DESC
             LIMIT ?",
        )?;
        let notifications = stmt
            .query_map((recipient_id.to_string(), limit as i64), map_notification)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Insert a batch atomically and return the stored rows (without sender)
    pub fn create_many(&self, batch: &[NewNotification]) -> Result<Vec<Notification>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(batch.len());

        for new in batch {
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO notifications (id, recipient_id, sender_id, type, content, related_id, is_read, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    id.to_string(),
                    new.recipient_id.to_string(),
                    new.sender_id.map(|s| s.to_string()),
                    new.kind.as_str(),
                    &new.content,
                    new.related_id.map(|r| r.to_string()),
                    new.is_read,
                    timestamp(&new.created_at),
                ),
            )
            .context("Failed to create notification")?;

            created.push(Notification {
                id,
                recipient_id: new.recipient_id,
                sender_id: new.sender_id,
                kind: new.kind,
                content: new.content.clone(),
                related_id: new.related_id,
                is_read: new.is_read,
                created_at: new.created_at,
                sender: None,
            });
        }

        tx.commit()?;
        Ok(created)
    }

    /// Returns whether a row matched
    pub fn mark_read(&self, id: &Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute("UPDATE notifications SET is_read = 1 WHERE id = ?", [id.to_string()])
            .context("Failed to mark notification read")?;
        Ok(changed > 0)
    }

    /// Returns how many unread rows were flipped
    pub fn mark_all_read(&self, recipient_id: &Uuid) -> Result<usize> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE recipient_id = ? AND is_read = 0",
                [recipient_id.to_string()],
            )
            .context("Failed to mark notifications read")?;
        Ok(changed)
    }

    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let deleted = conn
            .execute("DELETE FROM notifications WHERE id = ?", [id.to_string()])
            .context("Failed to delete notification")?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::repositories::ProfileRepository;
    use crate::local::Database;
    use chrono::{Duration, Utc};
    use pulse_types::{AuthUser, Profile, UserMetadata};

    fn setup() -> (NotificationRepository, ProfileRepository) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        (
            NotificationRepository::new(db.pool.clone()),
            ProfileRepository::new(db.pool),
        )
    }

    fn new_profile(repo: &ProfileRepository, email: &str) -> Profile {
        repo.create(&Profile::for_user(&AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: UserMetadata::default(),
        }))
        .unwrap()
    }

    #[test]
    fn test_list_joins_sender_newest_first() {
        let (repo, profiles) = setup();
        let alice = new_profile(&profiles, "alice@example.com");
        let bob = new_profile(&profiles, "bob@example.com");

        let mut older = NewNotification::new(alice.id, Some(bob.id), NotificationKind::Follow, "followed you");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = NewNotification::new(alice.id, None, NotificationKind::System, "welcome");
        repo.create_many(&[older, newer]).unwrap();

        let listed = repo.list_for_recipient(&alice.id, 50).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "welcome");
        assert!(listed[0].sender.is_none());
        assert_eq!(listed[1].sender.as_ref().unwrap().username, "bob");
        assert_eq!(listed[1].kind, NotificationKind::Follow);

        assert!(repo.list_for_recipient(&bob.id, 50).unwrap().is_empty());
    }

    #[test]
    fn test_mark_read_and_delete() {
        let (repo, _) = setup();
        let recipient = Uuid::new_v4();
        let created = repo
            .create_many(&[
                NewNotification::new(recipient, None, NotificationKind::Like, "a"),
                NewNotification::new(recipient, None, NotificationKind::Like, "b"),
                NewNotification::new(recipient, None, NotificationKind::Like, "c"),
            ])
            .unwrap();

        assert!(repo.mark_read(&created[0].id).unwrap());
        assert_eq!(repo.mark_all_read(&recipient).unwrap(), 2);
        assert_eq!(repo.mark_all_read(&recipient).unwrap(), 0);

        assert!(repo.delete(&created[1].id).unwrap());
        assert!(!repo.delete(&created[1].id).unwrap());
        assert!(!repo.mark_read(&Uuid::new_v4()).unwrap());

        let remaining = repo.list_for_recipient(&recipient, 50).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|n| n.is_read));
    }

    #[test]
    fn test_list_respects_limit() {
        let (repo, _) = setup();
        let recipient = Uuid::new_v4();
        let batch: Vec<_> = (0..5)
            .map(|i| NewNotification::new(recipient, None, NotificationKind::Comment, format!("n{}", i)))
            .collect();
        repo.create_many(&batch).unwrap();

        assert_eq!(repo.list_for_recipient(&recipient, 3).unwrap().len(), 3);
    }
}
