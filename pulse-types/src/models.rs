use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::NotificationKind;

// Custom serde module for DateTime to ensure RFC3339 string format
mod datetime_format {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = date.to_rfc3339();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<DateTime<Utc>>().map_err(serde::de::Error::custom)
    }
}

/// Identity metadata attached by the auth provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Authenticated identity as issued by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl AuthUser {
    /// Part of the email before `@`, or an empty string when there is no email
    pub fn email_local_part(&self) -> String {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

/// Session transitions pushed by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChange {
    SignedIn(Session),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub posts_count: i64,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Seed a profile row for a user signing in for the first time
    pub fn for_user(user: &AuthUser) -> Self {
        let local = user.email_local_part();
        let display_name = user
            .user_metadata
            .full_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| local.clone());

        Self {
            id: user.id,
            username: local,
            display_name,
            bio: Some(String::new()),
            avatar_url: user.user_metadata.avatar_url.clone(),
            is_verified: false,
            is_admin: false,
            is_banned: false,
            followers_count: 0,
            following_count: 0,
            posts_count: 0,
            likes_count: 0,
            created_at: None,
        }
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: Some(self.id),
            username: self.username.clone(),
            display_name: Some(self.display_name.clone()),
            avatar_url: self.avatar_url.clone(),
            is_verified: self.is_verified,
        }
    }
}

/// Partial profile update; only fields that are set are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.display_name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.is_verified.is_none()
            && self.is_banned.is_none()
    }

    /// Apply the set fields to a local copy of the profile
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(username) = &self.username {
            profile.username = username.clone();
        }
        if let Some(display_name) = &self.display_name {
            profile.display_name = display_name.clone();
        }
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
        if let Some(is_verified) = self.is_verified {
            profile.is_verified = is_verified;
        }
        if let Some(is_banned) = self.is_banned {
            profile.is_banned = is_banned;
        }
    }
}

/// Author/sender columns embedded in post and notification rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub sender_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    /// Post or profile the notification points at
    #[serde(default)]
    pub related_id: Option<Uuid>,
    pub is_read: bool,
    #[serde(with = "datetime_format")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ProfileSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<Uuid>,
    pub is_read: bool,
    #[serde(with = "datetime_format")]
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn new(
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            sender_id,
            kind,
            content: content.into(),
            related_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_related(mut self, related_id: Option<Uuid>) -> Self {
        self.related_id = related_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(with = "datetime_format")]
    pub created_at: DateTime<Utc>,
    /// Author columns, embedded under the `profiles` key by the backend
    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<ProfileSummary>,
    #[serde(default)]
    pub likes_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub user_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    #[serde(with = "datetime_format")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostLike {
    pub post_id: Uuid,
    pub user_id: Uuid,
}

/// One day bucket of the search counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub id: i64,
    pub query: String,
    pub search_count: i64,
    pub created_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSearchQuery {
    pub query: String,
    pub search_count: i64,
    pub created_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub query: String,
    pub search_count: i64,
    pub created_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reported_by: Uuid,
    #[serde(default)]
    pub post_id: Option<Uuid>,
    #[serde(default)]
    pub reported_user_id: Option<Uuid>,
    pub reason: String,
    #[serde(with = "datetime_format")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<ProfileSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_user(email: Option<&str>, full_name: Option<&str>) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: email.map(str::to_string),
            user_metadata: UserMetadata {
                full_name: full_name.map(str::to_string),
                avatar_url: Some("https://cdn.example/a.png".to_string()),
            },
        }
    }

    #[test]
    fn test_profile_for_user_uses_metadata_name() {
        let user = auth_user(Some("ada@example.com"), Some("Ada Lovelace"));
        let profile = Profile::for_user(&user);

        assert_eq!(profile.id, user.id);
        assert_eq!(profile.username, "ada");
        assert_eq!(profile.display_name, "Ada Lovelace");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn.example/a.png"));
        assert!(!profile.is_verified);
        assert_eq!(profile.posts_count, 0);
    }

    #[test]
    fn test_profile_for_user_falls_back_to_email() {
        let user = auth_user(Some("grace@navy.mil"), None);
        let profile = Profile::for_user(&user);
        assert_eq!(profile.display_name, "grace");

        let anonymous = auth_user(None, None);
        let profile = Profile::for_user(&anonymous);
        assert_eq!(profile.username, "");
        assert_eq!(profile.display_name, "");
    }

    #[test]
    fn test_notification_wire_format() {
        let json = r#"{
            "id": "6f1c1f3e-3c36-4c4a-9a53-1b8b2f6f2b10",
            "recipient_id": "0b8e5e5e-2a5d-4e7c-8f0a-3d9c2e1f4a11",
            "sender_id": null,
            "type": "admin",
            "content": "hello",
            "is_read": false,
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "sender": {"username": "mod", "display_name": "Moderator"}
        }"#;

        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.kind, NotificationKind::Admin);
        assert!(notification.sender_id.is_none());
        assert_eq!(notification.sender.unwrap().username, "mod");

        let value = serde_json::to_value(NewNotification::new(
            Uuid::new_v4(),
            None,
            NotificationKind::Follow,
            "followed you",
        ))
        .unwrap();
        assert_eq!(value["type"], "follow");
        assert_eq!(value["is_read"], false);
        assert!(value.get("related_id").is_none());
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("hi".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, serde_json::json!({ "bio": "hi" }));
        assert!(!update.is_empty());
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_search_query_day_bucket() {
        let row: SearchQuery = serde_json::from_str(
            r#"{"id": 7, "query": "rust", "search_count": 1200, "created_date": "2024-05-01"}"#,
        )
        .unwrap();
        assert_eq!(row.created_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }
}
