//! Hosted backend over HTTP.
//!
//! Tables are reached through the REST gateway (`/rest/v1`), identities
//! through the auth service (`/auth/v1`) and attachments through object
//! storage (`/storage/v1`). Realtime inserts are emulated by polling.

mod client;

pub use client::{encode_path, parse_content_range_total, Params, RestClient};

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use pulse_types::*;

use crate::backend::{first_bucket_since, Backend, PostFilter};
use crate::config::Remote;
use crate::error::{BackendError, BackendResult};
use crate::realtime::{poll_feed, ChangeFeed};

const PROFILE_SUMMARY: &str = "id,username,display_name,avatar_url,is_verified";

fn notification_select() -> String {
    format!("*,sender:sender_id({})", PROFILE_SUMMARY)
}

fn post_select() -> String {
    format!("*,profiles:user_id({}),post_likes(count)", PROFILE_SUMMARY)
}

fn report_select() -> String {
    format!("*,reporter:reported_by({})", PROFILE_SUMMARY)
}

/// Timestamps in filters use the `Z` suffix so no `+` reaches the query string
fn filter_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Quote a value for use inside an `or=(...)` group
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Deserialize)]
struct LikeCount {
    count: i64,
}

/// Post row with the aggregated like count embedded
#[derive(Debug, Deserialize)]
struct PostRow {
    #[serde(flatten)]
    post: Post,
    #[serde(default)]
    post_likes: Vec<LikeCount>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        let mut post = row.post;
        post.likes_count = row.post_likes.iter().map(|l| l.count).sum();
        post
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

/// Newest timestamp seen by a polling feed
type Cursor = Arc<Mutex<DateTime<Utc>>>;

fn read_cursor(cursor: &Cursor) -> DateTime<Utc> {
    *cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

fn advance_cursor(cursor: &Cursor, seen: impl Iterator<Item = DateTime<Utc>>) {
    let mut current = cursor.lock().unwrap_or_else(PoisonError::into_inner);
    for at in seen {
        if at > *current {
            *current = at;
        }
    }
}

#[derive(Clone)]
pub struct RestBackend {
    rest: RestClient,
    poll_interval: Duration,
    session: Arc<RwLock<Option<Session>>>,
    auth_tx: broadcast::Sender<AuthChange>,
}

impl RestBackend {
    pub fn new(settings: &Remote) -> Self {
        let (auth_tx, _) = broadcast::channel(16);
        Self {
            rest: RestClient::new(settings.url.clone(), settings.anon_key.clone()),
            poll_interval: settings.poll_interval(),
            session: Arc::new(RwLock::new(None)),
            auth_tx,
        }
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        self.rest
            .set_access_token(session.as_ref().map(|s| s.access_token.clone()));
        let change = match &session {
            Some(session) => AuthChange::SignedIn(session.clone()),
            None => AuthChange::SignedOut,
        };
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
        let _ = self.auth_tx.send(change);
    }

    async fn first<T>(&self, table: &str, mut params: Params) -> BackendResult<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        params.push(("limit", "1".to_string()));
        let rows: Vec<T> = self.rest.select(table, &params).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.current_session())
    }

    async fn restore_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        let response = self
            .rest
            .request_with_token(Method::GET, "/auth/v1/user", access_token)
            .send()
            .await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            tracing::debug!("Stored access token was rejected");
            return Ok(None);
        }
        let user: AuthUser = client::handle_response(response).await?;

        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            user,
        };
        self.set_session(Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let response = self
            .rest
            .request(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let token: TokenResponse = client::handle_response(response).await?;

        let session = Session::from(token);
        tracing::info!("Signed in as {}", session.user.id);
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.current_session().is_some() {
            let result = match self.rest.request(Method::POST, "/auth/v1/logout").send().await {
                Ok(response) => client::handle_empty(response).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                // The local session is dropped regardless
                tracing::warn!("Remote sign-out failed: {}", e);
            }
        }
        self.set_session(None);
        Ok(())
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }

    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        self.first("profiles", vec![("select", "*".into()), ("id", format!("eq.{}", id))])
            .await
    }

    async fn get_profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>> {
        self.first(
            "profiles",
            vec![("select", "*".into()), ("username", format!("eq.{}", username))],
        )
        .await
    }

    async fn insert_profile(&self, profile: &Profile) -> BackendResult<Profile> {
        let rows: Vec<Profile> = self.rest.insert("profiles", &Vec::new(), profile).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Api("Profile insert returned no row".to_string()))
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile> {
        let rows: Vec<Profile> = self
            .rest
            .update("profiles", &vec![("id", format!("eq.{}", id))], update)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("Profile {} not found", id)))
    }

    async fn delete_profile(&self, id: Uuid) -> BackendResult<()> {
        self.rest
            .delete("profiles", &vec![("id", format!("eq.{}", id))])
            .await
    }

    async fn list_profiles(&self, limit: usize) -> BackendResult<Vec<Profile>> {
        self.rest
            .select(
                "profiles",
                &vec![
                    ("select", "*".into()),
                    ("order", "created_at.desc".into()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    async fn list_profile_ids(&self) -> BackendResult<Vec<Uuid>> {
        let rows: Vec<IdRow> = self.rest.select("profiles", &vec![("select", "id".into())]).await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn search_profiles(&self, term: &str, limit: usize) -> BackendResult<Vec<Profile>> {
        let pattern = quoted(&format!("*{}*", term));
        self.rest
            .select(
                "profiles",
                &vec![
                    ("select", "*".into()),
                    (
                        "or",
                        format!("(display_name.ilike.{},username.ilike.{})", pattern, pattern),
                    ),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    async fn count_profiles(&self, verified_only: bool) -> BackendResult<u64> {
        let mut params: Params = vec![("select", "id".into())];
        if verified_only {
            params.push(("is_verified", "eq.true".into()));
        }
        self.rest.count("profiles", &params).await
    }

    async fn list_posts(&self, filter: &PostFilter) -> BackendResult<Vec<Post>> {
        let mut params: Params = vec![
            ("select", post_select()),
            ("order", "created_at.desc".into()),
            ("limit", filter.limit.to_string()),
        ];
        if let Some(author_id) = filter.author_id {
            params.push(("user_id", format!("eq.{}", author_id)));
        }
        if let Some(term) = &filter.content_contains {
            params.push(("content", format!("ilike.*{}*", term)));
        }

        let rows: Vec<PostRow> = self.rest.select("posts", &params).await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post> {
        let rows: Vec<PostRow> = self
            .rest
            .insert("posts", &vec![("select", post_select())], post)
            .await?;
        rows.into_iter()
            .next()
            .map(Post::from)
            .ok_or_else(|| BackendError::Api("Post insert returned no row".to_string()))
    }

    async fn delete_post(&self, id: Uuid) -> BackendResult<()> {
        self.rest.delete("posts", &vec![("id", format!("eq.{}", id))]).await
    }

    async fn count_posts(&self) -> BackendResult<u64> {
        self.rest.count("posts", &vec![("select", "id".into())]).await
    }

    async fn like_post(&self, like: &PostLike) -> BackendResult<()> {
        self.rest
            .insert_minimal(
                "post_likes",
                "return=minimal,resolution=ignore-duplicates",
                &vec![("on_conflict", "post_id,user_id".into())],
                like,
            )
            .await
    }

    async fn unlike_post(&self, like: &PostLike) -> BackendResult<()> {
        self.rest
            .delete(
                "post_likes",
                &vec![
                    ("post_id", format!("eq.{}", like.post_id)),
                    ("user_id", format!("eq.{}", like.user_id)),
                ],
            )
            .await
    }

    async fn subscribe_posts(&self) -> BackendResult<ChangeFeed<Post>> {
        let rest = self.rest.clone();
        let cursor: Cursor = Arc::new(Mutex::new(Utc::now()));
        tracing::debug!("Polling posts every {:?}", self.poll_interval);

        Ok(poll_feed(self.poll_interval, move || {
            let rest = rest.clone();
            let cursor = cursor.clone();
            async move {
                let params: Params = vec![
                    ("select", post_select()),
                    ("created_at", format!("gt.{}", filter_time(&read_cursor(&cursor)))),
                    ("order", "created_at.asc".into()),
                ];
                let rows: Vec<PostRow> = rest.select("posts", &params).await?;
                let posts: Vec<Post> = rows.into_iter().map(Post::from).collect();
                advance_cursor(&cursor, posts.iter().map(|p| p.created_at));
                Ok(posts)
            }
        }))
    }

    async fn list_notifications(&self, recipient_id: Uuid, limit: usize) -> BackendResult<Vec<Notification>> {
        self.rest
            .select(
                "notifications",
                &vec![
                    ("select", notification_select()),
                    ("recipient_id", format!("eq.{}", recipient_id)),
                    ("order", "created_at.desc".into()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    async fn insert_notifications(&self, batch: &[NewNotification]) -> BackendResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.rest
            .insert_minimal("notifications", "return=minimal", &Vec::new(), batch)
            .await
    }

    async fn mark_notification_read(&self, id: Uuid) -> BackendResult<()> {
        self.rest
            .update_minimal(
                "notifications",
                &vec![("id", format!("eq.{}", id))],
                &serde_json::json!({ "is_read": true }),
            )
            .await
    }

    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> BackendResult<()> {
        self.rest
            .update_minimal(
                "notifications",
                &vec![
                    ("recipient_id", format!("eq.{}", recipient_id)),
                    ("is_read", "eq.false".into()),
                ],
                &serde_json::json!({ "is_read": true }),
            )
            .await
    }

    async fn delete_notification(&self, id: Uuid) -> BackendResult<()> {
        self.rest
            .delete("notifications", &vec![("id", format!("eq.{}", id))])
            .await
    }

    async fn subscribe_notifications(&self, recipient_id: Uuid) -> BackendResult<ChangeFeed<Notification>> {
        let rest = self.rest.clone();
        let cursor: Cursor = Arc::new(Mutex::new(Utc::now()));
        tracing::debug!(
            "Polling notifications for {} every {:?}",
            recipient_id,
            self.poll_interval
        );

        Ok(poll_feed(self.poll_interval, move || {
            let rest = rest.clone();
            let cursor = cursor.clone();
            async move {
                let params: Params = vec![
                    ("select", notification_select()),
                    ("recipient_id", format!("eq.{}", recipient_id)),
                    ("created_at", format!("gt.{}", filter_time(&read_cursor(&cursor)))),
                    ("order", "created_at.asc".into()),
                ];
                let rows: Vec<Notification> = rest.select("notifications", &params).await?;
                advance_cursor(&cursor, rows.iter().map(|n| n.created_at));
                Ok(rows)
            }
        }))
    }

    async fn find_search_query(&self, query: &str, day: NaiveDate) -> BackendResult<Option<SearchQuery>> {
        self.first(
            "search_queries",
            vec![
                ("select", "*".into()),
                ("query", format!("eq.{}", query)),
                ("created_date", format!("eq.{}", day)),
            ],
        )
        .await
    }

    async fn insert_search_query(&self, entry: &NewSearchQuery) -> BackendResult<SearchQuery> {
        let rows: Vec<SearchQuery> = self.rest.insert("search_queries", &Vec::new(), entry).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Api("Search query insert returned no row".to_string()))
    }

    async fn set_search_count(&self, id: i64, search_count: i64) -> BackendResult<()> {
        self.rest
            .update_minimal(
                "search_queries",
                &vec![("id", format!("eq.{}", id))],
                &serde_json::json!({ "search_count": search_count }),
            )
            .await
    }

    async fn top_search_queries(
        &self,
        min_count: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BackendResult<Vec<TrendingTopic>> {
        self.rest
            .select(
                "search_queries",
                &vec![
                    ("select", "query,search_count,created_date".into()),
                    ("search_count", format!("gte.{}", min_count)),
                    ("created_date", format!("gte.{}", first_bucket_since(since))),
                    ("order", "search_count.desc,query.asc".into()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    async fn delete_search_queries_before(&self, day: NaiveDate) -> BackendResult<()> {
        self.rest
            .delete("search_queries", &vec![("created_date", format!("lt.{}", day))])
            .await
    }

    async fn list_reports(&self, limit: usize) -> BackendResult<Vec<Report>> {
        self.rest
            .select(
                "reports",
                &vec![
                    ("select", report_select()),
                    ("order", "created_at.desc".into()),
                    ("limit", limit.to_string()),
                ],
            )
            .await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<String> {
        self.rest.upload(bucket, path, bytes, content_type).await?;
        Ok(self.rest.public_url(bucket, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_post_row_sums_like_counts() {
        let json = r#"{
            "id": "6f1c1f3e-3c36-4c4a-9a53-1b8b2f6f2b10",
            "user_id": "0b8e5e5e-2a5d-4e7c-8f0a-3d9c2e1f4a11",
            "content": "hello",
            "image_url": null,
            "created_at": "2024-05-01T10:00:00+00:00",
            "profiles": {"id": "0b8e5e5e-2a5d-4e7c-8f0a-3d9c2e1f4a11", "username": "ada", "is_verified": true},
            "post_likes": [{"count": 3}]
        }"#;
        let post: Post = serde_json::from_str::<PostRow>(json).unwrap().into();
        assert_eq!(post.likes_count, 3);
        assert_eq!(post.author.unwrap().username, "ada");
    }

    #[test]
    fn test_token_response_computes_expiry() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token": "a", "refresh_token": "r", "expires_in": 3600,
                "user": {"id": "0b8e5e5e-2a5d-4e7c-8f0a-3d9c2e1f4a11", "email": "ada@example.com"}}"#,
        )
        .unwrap();
        let before = Utc::now().timestamp();
        let session = Session::from(token);
        assert!(session.expires_at.unwrap() >= before + 3600);
        assert_eq!(session.user.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let cursor: Cursor = Arc::new(Mutex::new(start));
        let later = start + chrono::Duration::seconds(5);

        advance_cursor(&cursor, [later, start].into_iter());
        assert_eq!(read_cursor(&cursor), later);
        assert_eq!(filter_time(&later), "2024-05-01T10:00:05.000000Z");
    }

    #[test]
    fn test_quoted_escapes() {
        assert_eq!(quoted("*a,b*"), "\"*a,b*\"");
        assert_eq!(quoted("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[tokio::test]
    async fn test_new_backend_has_no_session() {
        let backend = RestBackend::new(&Remote {
            url: "http://localhost:54321".to_string(),
            anon_key: "anon".to_string(),
            poll_interval_secs: 5,
        });
        assert!(backend.get_session().await.unwrap().is_none());
    }
}
