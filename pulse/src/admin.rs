use std::sync::Arc;

use uuid::Uuid;

use pulse_backend::{Backend, PostFilter};
use pulse_types::{NewNotification, NotificationKind, Post, Profile, ProfileUpdate, Report};

use crate::error::{logged, ClientError, ClientResult};

/// Rows shown per admin list
pub const ADMIN_LIST_LIMIT: usize = 50;

pub const BANNED_MESSAGE: &str =
    "Your account has been banned for violating the community policy. Contact support for help.";
pub const VERIFIED_MESSAGE: &str = "Congratulations! Your account has been verified.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminStats {
    pub total_users: u64,
    pub total_posts: u64,
    pub verified_accounts: u64,
}

/// Who receives an admin notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    User(Uuid),
    Everyone,
}

/// Moderation operations, available only to admins
pub struct AdminConsole {
    backend: Arc<dyn Backend>,
    admin_id: Uuid,
}

impl AdminConsole {
    pub fn new(backend: Arc<dyn Backend>, admin: &Profile) -> ClientResult<Self> {
        if !admin.is_admin {
            log::warn!("Profile {} tried to open the admin console", admin.id);
            return Err(ClientError::Forbidden("Admin access required".to_string()));
        }
        Ok(Self {
            backend,
            admin_id: admin.id,
        })
    }

    pub async fn stats(&self) -> ClientResult<AdminStats> {
        let total_users = logged("counting users", self.backend.count_profiles(false).await)?;
        let total_posts = logged("counting posts", self.backend.count_posts().await)?;
        let verified_accounts = logged(
            "counting verified users",
            self.backend.count_profiles(true).await,
        )?;
        Ok(AdminStats {
            total_users,
            total_posts,
            verified_accounts,
        })
    }

    pub async fn users(&self) -> ClientResult<Vec<Profile>> {
        logged("fetching users", self.backend.list_profiles(ADMIN_LIST_LIMIT).await)
    }

    pub async fn posts(&self) -> ClientResult<Vec<Post>> {
        logged(
            "fetching posts",
            self.backend.list_posts(&PostFilter::latest(ADMIN_LIST_LIMIT)).await,
        )
    }

    pub async fn reports(&self) -> ClientResult<Vec<Report>> {
        logged("fetching reports", self.backend.list_reports(ADMIN_LIST_LIMIT).await)
    }

    /// Send an admin notification. Returns how many were sent.
    pub async fn send_notification(&self, recipients: Recipients, message: &str) -> ClientResult<usize> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ClientError::validation("Message cannot be empty"));
        }

        let recipient_ids = match recipients {
            Recipients::User(id) if id.is_nil() => {
                return Err(ClientError::validation("Choose a user or send to everyone"));
            }
            Recipients::User(id) => vec![id],
            Recipients::Everyone => logged("fetching user ids", self.backend.list_profile_ids().await)?,
        };
        if recipient_ids.is_empty() {
            return Ok(0);
        }

        let batch: Vec<NewNotification> = recipient_ids
            .iter()
            .map(|id| NewNotification::new(*id, Some(self.admin_id), NotificationKind::Admin, message))
            .collect();
        logged(
            "sending notification",
            self.backend.insert_notifications(&batch).await,
        )?;

        log::info!("Admin {} sent a notification to {} users", self.admin_id, batch.len());
        Ok(batch.len())
    }

    pub async fn ban_user(&self, user_id: Uuid) -> ClientResult<Profile> {
        let update = ProfileUpdate {
            is_banned: Some(true),
            ..Default::default()
        };
        self.flag_and_notify(user_id, &update, BANNED_MESSAGE).await
    }

    pub async fn verify_user(&self, user_id: Uuid) -> ClientResult<Profile> {
        let update = ProfileUpdate {
            is_verified: Some(true),
            ..Default::default()
        };
        self.flag_and_notify(user_id, &update, VERIFIED_MESSAGE).await
    }

    pub async fn delete_post(&self, post_id: Uuid) -> ClientResult<()> {
        logged("deleting post", self.backend.delete_post(post_id).await)?;
        log::info!("Admin {} deleted post {}", self.admin_id, post_id);
        Ok(())
    }

    // The flag change is what matters; a lost notification is only logged
    async fn flag_and_notify(&self, user_id: Uuid, update: &ProfileUpdate, message: &str) -> ClientResult<Profile> {
        let profile = logged(
            "updating user",
            self.backend.update_profile(user_id, update).await,
        )?;

        let notification = NewNotification::new(user_id, Some(self.admin_id), NotificationKind::Admin, message);
        if let Err(e) = self.backend.insert_notifications(&[notification]).await {
            log::warn!("Could not notify user {}: {}", user_id, e);
        }
        Ok(profile)
    }
}
