//! Embedded backend on SQLite.
//!
//! Serves the same tables as the hosted service, with a development auth
//! service (any non-empty password signs in, unknown emails get an account)
//! and in-process realtime channels.

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbPool};

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use pulse_types::*;

use crate::backend::{first_bucket_since, Backend, PostFilter};
use crate::error::{BackendError, BackendResult};
use crate::realtime::{forward_broadcast, ChangeFeed};
use repositories::{
    AccountRepository, NotificationRepository, ObjectRepository, PostRepository, ProfileRepository,
    ReportRepository, SearchQueryRepository,
};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    session: Arc<RwLock<Option<Session>>>,
    auth_tx: broadcast::Sender<AuthChange>,
    notifications_tx: broadcast::Sender<Notification>,
    posts_tx: broadcast::Sender<Post>,
}

impl LocalBackend {
    /// Open (and create if needed) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let db = Database::new(path)?;
        db.initialize()?;
        Ok(Self::with_database(db))
    }

    /// Fresh private database, gone when the backend is dropped
    pub fn in_memory() -> BackendResult<Self> {
        Self::open(":memory:")
    }

    fn with_database(db: Database) -> Self {
        let (auth_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (notifications_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (posts_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            db,
            session: Arc::new(RwLock::new(None)),
            auth_tx,
            notifications_tx,
            posts_tx,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Grant or revoke admin rights. Admin rights are never granted by the client itself.
    pub fn grant_admin(&self, id: Uuid, is_admin: bool) -> BackendResult<()> {
        let changed = ProfileRepository::new(self.db.pool.clone()).set_admin(&id, is_admin)?;
        if !changed {
            return Err(BackendError::NotFound(format!("Profile {} not found", id)));
        }
        Ok(())
    }

    /// File a moderation report
    pub fn create_report(&self, report: &Report) -> BackendResult<()> {
        ReportRepository::new(self.db.pool.clone()).create(report)?;
        Ok(())
    }

    /// Content type and bytes of an uploaded object
    pub fn object(&self, bucket: &str, path: &str) -> BackendResult<Option<(String, Vec<u8>)>> {
        Ok(ObjectRepository::new(self.db.pool.clone()).get(bucket, path)?)
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn begin_session(&self, user: AuthUser) -> BackendResult<Session> {
        let token = AccountRepository::new(self.db.pool.clone()).create_session(&user.id)?;
        let session = Session {
            access_token: token,
            refresh_token: None,
            expires_at: None,
            user,
        };
        self.set_session(Some(session.clone()));
        // No receivers is fine
        let _ = self.auth_tx.send(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.current_session())
    }

    async fn restore_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        let accounts = AccountRepository::new(self.db.pool.clone());
        let Some(user) = accounts.find_by_session(access_token)? else {
            tracing::debug!("Stored access token is no longer valid");
            return Ok(None);
        };

        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            user,
        };
        self.set_session(Some(session.clone()));
        let _ = self.auth_tx.send(AuthChange::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(BackendError::BadRequest("A valid email is required".to_string()));
        }
        if password.is_empty() {
            return Err(BackendError::Unauthorized("Invalid login credentials".to_string()));
        }

        let accounts = AccountRepository::new(self.db.pool.clone());
        let user = match accounts.find_by_email(email)? {
            Some(user) => user,
            None => {
                tracing::info!("Creating development account for {}", email);
                accounts.create(email, None)?
            }
        };

        self.begin_session(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(session) = self.current_session() {
            AccountRepository::new(self.db.pool.clone()).delete_session(&session.access_token)?;
        }
        self.set_session(None);
        let _ = self.auth_tx.send(AuthChange::SignedOut);
        Ok(())
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }

    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        Ok(ProfileRepository::new(self.db.pool.clone()).get_by_id(&id)?)
    }

    async fn get_profile_by_username(&self, username: &str) -> BackendResult<Option<Profile>> {
        Ok(ProfileRepository::new(self.db.pool.clone()).get_by_username(username)?)
    }

    async fn insert_profile(&self, profile: &Profile) -> BackendResult<Profile> {
        let profiles = ProfileRepository::new(self.db.pool.clone());
        if profiles.get_by_id(&profile.id)?.is_some() {
            return Err(BackendError::Conflict(format!("Profile {} already exists", profile.id)));
        }
        Ok(profiles.create(profile)?)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> BackendResult<Profile> {
        ProfileRepository::new(self.db.pool.clone())
            .update(&id, update)?
            .ok_or_else(|| BackendError::NotFound(format!("Profile {} not found", id)))
    }

    async fn delete_profile(&self, id: Uuid) -> BackendResult<()> {
        ProfileRepository::new(self.db.pool.clone()).delete(&id)?;
        Ok(())
    }

    async fn list_profiles(&self, limit: usize) -> BackendResult<Vec<Profile>> {
        Ok(ProfileRepository::new(self.db.pool.clone()).list(limit)?)
    }

    async fn list_profile_ids(&self) -> BackendResult<Vec<Uuid>> {
        Ok(ProfileRepository::new(self.db.pool.clone()).list_ids()?)
    }

    async fn search_profiles(&self, term: &str, limit: usize) -> BackendResult<Vec<Profile>> {
        Ok(ProfileRepository::new(self.db.pool.clone()).search(term, limit)?)
    }

    async fn count_profiles(&self, verified_only: bool) -> BackendResult<u64> {
        Ok(ProfileRepository::new(self.db.pool.clone()).count(verified_only)?)
    }

    async fn list_posts(&self, filter: &PostFilter) -> BackendResult<Vec<Post>> {
        Ok(PostRepository::new(self.db.pool.clone()).list(filter)?)
    }

    async fn insert_post(&self, post: &NewPost) -> BackendResult<Post> {
        let mut created = PostRepository::new(self.db.pool.clone()).create(post)?;
        if let Some(author) = ProfileRepository::new(self.db.pool.clone()).get_by_id(&post.user_id)? {
            created.author = Some(author.summary());
        }
        let _ = self.posts_tx.send(created.clone());
        Ok(created)
    }

    async fn delete_post(&self, id: Uuid) -> BackendResult<()> {
        PostRepository::new(self.db.pool.clone()).delete(&id)?;
        Ok(())
    }

    async fn count_posts(&self) -> BackendResult<u64> {
        Ok(PostRepository::new(self.db.pool.clone()).count()?)
    }

    async fn like_post(&self, like: &PostLike) -> BackendResult<()> {
        PostRepository::new(self.db.pool.clone()).like(like)?;
        Ok(())
    }

    async fn unlike_post(&self, like: &PostLike) -> BackendResult<()> {
        PostRepository::new(self.db.pool.clone()).unlike(like)?;
        Ok(())
    }

    async fn subscribe_posts(&self) -> BackendResult<ChangeFeed<Post>> {
        Ok(forward_broadcast(self.posts_tx.subscribe(), |_| true))
    }

    async fn list_notifications(&self, recipient_id: Uuid, limit: usize) -> BackendResult<Vec<Notification>> {
        Ok(NotificationRepository::new(self.db.pool.clone()).list_for_recipient(&recipient_id, limit)?)
    }

    async fn insert_notifications(&self, batch: &[NewNotification]) -> BackendResult<()> {
        let created = NotificationRepository::new(self.db.pool.clone()).create_many(batch)?;
        tracing::debug!("Inserted {} notifications", created.len());
        for notification in created {
            let _ = self.notifications_tx.send(notification);
        }
        Ok(())
    }

    async fn mark_notification_read(&self, id: Uuid) -> BackendResult<()> {
        NotificationRepository::new(self.db.pool.clone()).mark_read(&id)?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, recipient_id: Uuid) -> BackendResult<()> {
        NotificationRepository::new(self.db.pool.clone()).mark_all_read(&recipient_id)?;
        Ok(())
    }

    async fn delete_notification(&self, id: Uuid) -> BackendResult<()> {
        NotificationRepository::new(self.db.pool.clone()).delete(&id)?;
        Ok(())
    }

    async fn subscribe_notifications(&self, recipient_id: Uuid) -> BackendResult<ChangeFeed<Notification>> {
        Ok(forward_broadcast(
            self.notifications_tx.subscribe(),
            move |n: &Notification| n.recipient_id == recipient_id,
        ))
    }

    async fn find_search_query(&self, query: &str, day: NaiveDate) -> BackendResult<Option<SearchQuery>> {
        Ok(SearchQueryRepository::new(self.db.pool.clone()).find(query, day)?)
    }

    async fn insert_search_query(&self, entry: &NewSearchQuery) -> BackendResult<SearchQuery> {
        let queries = SearchQueryRepository::new(self.db.pool.clone());
        if queries.find(&entry.query, entry.created_date)?.is_some() {
            return Err(BackendError::Conflict(format!(
                "Search query '{}' already tracked for {}",
                entry.query, entry.created_date
            )));
        }
        Ok(queries.create(entry)?)
    }

    async fn set_search_count(&self, id: i64, search_count: i64) -> BackendResult<()> {
        let changed = SearchQueryRepository::new(self.db.pool.clone()).set_count(id, search_count)?;
        if !changed {
            return Err(BackendError::NotFound(format!("Search query {} not found", id)));
        }
        Ok(())
    }

    async fn top_search_queries(
        &self,
        min_count: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> BackendResult<Vec<TrendingTopic>> {
        Ok(SearchQueryRepository::new(self.db.pool.clone()).top(min_count, first_bucket_since(since), limit)?)
    }

    async fn delete_search_queries_before(&self, day: NaiveDate) -> BackendResult<()> {
        let deleted = SearchQueryRepository::new(self.db.pool.clone()).delete_before(day)?;
        tracing::debug!("Deleted {} search buckets before {}", deleted, day);
        Ok(())
    }

    async fn list_reports(&self, limit: usize) -> BackendResult<Vec<Report>> {
        Ok(ReportRepository::new(self.db.pool.clone()).list(limit)?)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<String> {
        ObjectRepository::new(self.db.pool.clone()).put(bucket, path, &bytes, content_type)?;
        Ok(format!("local://{}/{}", bucket, path))
    }
}
