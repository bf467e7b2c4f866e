use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use pulse_types::*;

use crate::error::BackendResult;
use crate::realtime::ChangeFeed;

/// Storage bucket holding post attachments
pub const POSTS_BUCKET: &str = "posts";

/// Which posts to list. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub author_id: Option<Uuid>,
    /// Case-insensitive substring of the post content
    pub content_contains: Option<String>,
    pub limit: usize,
}

impl PostFilter {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn by_author(author_id: Uuid, limit: usize) -> Self {
        Self {
            author_id: Some(author_id),
            limit,
            ..Default::default()
        }
    }

    pub fn matching(term: impl Into<String>, limit: usize) -> Self {
        Self {
            content_contains: Some(term.into()),
            limit,
            ..Default::default()
        }
    }
}

/// Earliest day bucket inside a window starting at `since`.
///
/// Buckets are compared by calendar date, so the bucket of the day `since`
/// falls on still counts.
pub fn first_bucket_since(since: DateTime<Utc>) -> NaiveDate {
    since.date_naive()
}

/// Everything the client needs from the hosted backend.
///
/// Each method maps onto one request against a table, the auth service or
/// object storage. Implementations must be cheap to share behind an `Arc`.
#[async_trait]
pub trait Backend: Send + Sync {
    // Auth

    /// Session currently held by this client, if any
    async fn get_session(&self) -> BackendResult<Option<Session>>;

    /// Re-establish a session from a previously issued access token.
    /// Returns `None` when the token is no longer valid.
    async fn restore_session(&self, access_token: &str) -> BackendResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Stream of session transitions, starting from the moment of the call
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange>;

    // profiles

    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>>;

    async fn get_profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>>;

    async fn insert_profile(&self, profile: &Profile) -> BackendResult<Profile>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile>;

    async fn delete_profile(&self, id: Uuid) -> BackendResult<()>;

    /// Newest profiles first
    async fn list_profiles(&self, limit: usize) -> BackendResult<Vec<Profile>>;

    async fn list_profile_ids(&self) -> BackendResult<Vec<Uuid>>;

    /// Case-insensitive match on username or display name
    async fn search_profiles(&self, term: &str, limit: usize) -> BackendResult<Vec<Profile>>;

    async fn count_profiles(&self, verified_only: bool) -> BackendResult<u64>;

    // posts

    async fn list_posts(&self, filter: &PostFilter) -> BackendResult<Vec<Post>>;

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post>;

    async fn delete_post(&self, id: Uuid) -> BackendResult<()>;

    async fn count_posts(&self) -> BackendResult<u64>;

    async fn like_post(&self, like: &PostLike) -> BackendResult<()>;

    async fn unlike_post(&self, like: &PostLike) -> BackendResult<()>;

    /// Insert events on `posts`, unfiltered
    async fn subscribe_posts(&self) -> BackendResult<ChangeFeed<Post>>;

    // notifications

    /// Newest first, with the sender summary embedded
    async fn list_notifications(&self, recipient_id: Uuid, limit: usize) -> BackendResult<Vec<Notification>>;

    async fn insert_notifications(&self, batch: &[NewNotification]) -> BackendResult<()>;

    async fn mark_notification_read(&self, id: Uuid) -> BackendResult<()>;

    /// Flip every unread notification of the recipient
    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> BackendResult<()>;

    async fn delete_notification(&self, id: Uuid) -> BackendResult<()>;

    /// Insert events on `notifications` for one recipient
    async fn subscribe_notifications(&self, recipient_id: Uuid) -> BackendResult<ChangeFeed<Notification>>;

    // search_queries

    async fn find_search_query(&self, query: &str, day: NaiveDate) -> BackendResult<Option<SearchQuery>>;

    async fn insert_search_query(&self, entry: &NewSearchQuery) -> BackendResult<SearchQuery>;

    async fn set_search_count(&self, id: i64, search_count: i64) -> BackendResult<()>;

    /// Buckets with at least `min_count` searches whose day starts at or
    /// after `since`, highest count first
    async fn top_search_queries(
        &self,
        min_count: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BackendResult<Vec<TrendingTopic>>;

    async fn delete_search_queries_before(&self, day: NaiveDate) -> BackendResult<()>;

    // reports

    async fn list_reports(&self, limit: usize) -> BackendResult<Vec<Report>>;

    // storage

    /// Upload an object and return its public URL
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_first_bucket_since_mid_day() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap();
        assert_eq!(
            first_bucket_since(since),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_first_bucket_since_midnight() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            first_bucket_since(since),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_post_filter_constructors() {
        let id = Uuid::new_v4();
        assert_eq!(PostFilter::by_author(id, 5).author_id, Some(id));
        assert_eq!(
            PostFilter::matching("rust", 20).content_contains.as_deref(),
            Some("rust")
        );
        assert_eq!(PostFilter::latest(50).limit, 50);
    }
}
