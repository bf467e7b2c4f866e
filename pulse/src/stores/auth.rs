use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use pulse_backend::{Backend, BackendError};
use pulse_types::{AuthChange, AuthUser, Profile, ProfileUpdate, Session};

use super::Subscription;
use crate::error::{logged, ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    /// True until the first session check has finished
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            profile: None,
            loading: true,
        }
    }
}

/// Shared between the store and its session listener
#[derive(Clone)]
struct AuthCore {
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<AuthState>>,
    // Serializes profile syncs so a sign-in and its broadcast event cannot
    // both try to create the profile row
    sync_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AuthCore {
    async fn sync(&self, session: Option<Session>) -> ClientResult<Option<Profile>> {
        let _guard = self.sync_lock.lock().await;
        self.sync_locked(session).await
    }

    /// Caller must hold `sync_lock`
    async fn sync_locked(&self, session: Option<Session>) -> ClientResult<Option<Profile>> {
        let Some(session) = session else {
            self.state.send_modify(|s| {
                s.user = None;
                s.profile = None;
            });
            return Ok(None);
        };

        // A queued event may describe a session that has since ended
        let current = logged("getting session", self.backend.get_session().await)?;
        if current.map(|c| c.user.id) != Some(session.user.id) {
            log::debug!("Skipping stale session for {}", session.user.id);
            return Ok(None);
        }

        let profile = self.fetch_or_create_profile(&session.user).await?;
        self.state.send_modify(|s| {
            s.user = Some(session.user.clone());
            s.profile = Some(profile.clone());
        });
        Ok(Some(profile))
    }

    async fn fetch_or_create_profile(&self, user: &AuthUser) -> ClientResult<Profile> {
        if let Some(profile) = logged("fetching profile", self.backend.get_profile(user.id).await)? {
            return Ok(profile);
        }

        log::info!("Creating profile for new user {}", user.id);
        match self.backend.insert_profile(&Profile::for_user(user)).await {
            Ok(profile) => Ok(profile),
            Err(BackendError::Conflict(_)) => {
                logged("fetching profile", self.backend.get_profile(user.id).await)?
                    .ok_or_else(|| ClientError::NotFound(format!("Profile {}", user.id)))
            }
            Err(e) => logged("creating profile", Err(e)),
        }
    }

    fn user_id(&self) -> ClientResult<uuid::Uuid> {
        self.state
            .borrow()
            .user
            .as_ref()
            .map(|u| u.id)
            .ok_or(ClientError::NotAuthenticated)
    }
}

/// Signed-in user and their profile, kept in step with the backend session
#[derive(Clone)]
pub struct AuthStore {
    core: AuthCore,
    listener: Arc<Mutex<Option<Subscription>>>,
}

impl AuthStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            core: AuthCore {
                backend,
                state: Arc::new(state),
                sync_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.core.state.subscribe()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.core.state.borrow().user.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.core.state.borrow().profile.clone()
    }

    pub fn is_admin(&self) -> bool {
        self.core
            .state
            .borrow()
            .profile
            .as_ref()
            .map(|p| p.is_admin)
            .unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.core.state.borrow().loading
    }

    /// Access token of the backend session, for persisting between runs
    pub async fn access_token(&self) -> Option<String> {
        match self.core.backend.get_session().await {
            Ok(session) => session.map(|s| s.access_token),
            Err(e) => {
                log::warn!("Could not read session: {}", e);
                None
            }
        }
    }

    /// Load the current session and keep following session changes.
    ///
    /// The listener is registered before the session is read so that a
    /// change landing in between is not lost. Calling this again replaces
    /// the listener.
    pub async fn initialize(&self) -> ClientResult<Option<Profile>> {
        let mut changes = self.core.backend.auth_changes();
        let core = self.core.clone();
        let task = tokio::spawn(async move {
            loop {
                let session = match changes.recv().await {
                    Ok(AuthChange::SignedIn(session)) => Some(session),
                    Ok(AuthChange::SignedOut) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} session changes, re-reading session", skipped);
                        match core.backend.get_session().await {
                            Ok(session) => session,
                            Err(e) => {
                                log::error!("Error reading session: {}", e);
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                log::debug!("Session changed, signed in: {}", session.is_some());
                // Failures are logged inside sync
                let _ = core.sync(session).await;
            }
        });
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(Subscription::new(task));

        let result = match logged("getting session", self.core.backend.get_session().await) {
            Ok(session) => self.core.sync(session).await,
            Err(e) => Err(e),
        };
        self.core.state.send_modify(|s| s.loading = false);
        result
    }

    /// Stop following session changes
    pub fn shutdown(&self) {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<Profile> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ClientError::validation("Please enter a valid email address"));
        }
        if password.is_empty() {
            return Err(ClientError::validation("Password cannot be empty"));
        }

        let session = logged(
            "signing in",
            self.core.backend.sign_in_with_password(email, password).await,
        )?;
        log::info!("Signed in as {}", session.user.id);

        self.core
            .sync(Some(session))
            .await?
            .ok_or_else(|| ClientError::NotFound("Profile".to_string()))
    }

    /// Sign out and forget the local user, even if the backend call fails
    pub async fn sign_out(&self) -> ClientResult<()> {
        let result = logged("signing out", self.core.backend.sign_out().await);
        self.core.sync(None).await?;
        result
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> ClientResult<Profile> {
        let id = self.core.user_id()?;
        if update.is_empty() {
            return Err(ClientError::validation("Nothing to update"));
        }

        let profile = logged(
            "updating profile",
            self.core.backend.update_profile(id, update).await,
        )?;
        self.core.state.send_modify(|s| s.profile = Some(profile.clone()));
        Ok(profile)
    }

    /// Delete the profile row, then sign out
    pub async fn delete_account(&self) -> ClientResult<()> {
        let _guard = self.core.sync_lock.lock().await;
        let id = self.core.user_id()?;
        logged("deleting profile", self.core.backend.delete_profile(id).await)?;
        log::info!("Deleted profile {}", id);

        let result = logged("signing out", self.core.backend.sign_out().await);
        self.core.sync_locked(None).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_backend::LocalBackend;
    use std::time::Duration;

    fn store() -> (AuthStore, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        (AuthStore::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let (store, _) = store();
        assert!(store.is_loading());

        assert_eq!(store.initialize().await.unwrap(), None);
        assert!(!store.is_loading());
        assert!(store.current_user().is_none());
        assert!(store.profile().is_none());
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_profile() {
        let (store, backend) = store();
        store.initialize().await.unwrap();

        let profile = store.sign_in("ada@example.com", "secret").await.unwrap();
        assert_eq!(profile.username, "ada");
        assert_eq!(profile.display_name, "ada");
        assert!(!profile.is_verified);
        assert_eq!(backend.count_profiles(false).await.unwrap(), 1);

        store.sign_out().await.unwrap();
        let again = store.sign_in("ada@example.com", "secret").await.unwrap();
        assert_eq!(again.id, profile.id);
        assert_eq!(backend.count_profiles(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sign_in_validation() {
        let (store, _) = store();
        assert!(matches!(
            store.sign_in("not-an-email", "pw").await,
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            store.sign_in("ada@example.com", "").await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_picks_up_existing_session() {
        let (store, backend) = store();
        let session = backend.sign_in_with_password("grace@example.com", "pw").await.unwrap();

        let profile = store.initialize().await.unwrap().unwrap();
        assert_eq!(profile.id, session.user.id);
        assert_eq!(store.current_user().unwrap().id, session.user.id);
    }

    #[tokio::test]
    async fn test_listener_follows_session_changes() {
        let (store, backend) = store();
        store.initialize().await.unwrap();
        let mut rx = store.watch();

        backend.sign_in_with_password("linus@example.com", "pw").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.profile.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.profile().unwrap().username, "linus");

        backend.sign_out().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.user.is_none()))
            .await
            .unwrap()
            .unwrap();
        assert!(store.profile().is_none());
    }

    #[tokio::test]
    async fn test_update_profile_requires_user() {
        let (store, _) = store();
        let update = ProfileUpdate {
            bio: Some("hello".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_profile(&update).await,
            Err(ClientError::NotAuthenticated)
        ));

        store.sign_in("ada@example.com", "pw").await.unwrap();
        let profile = store.update_profile(&update).await.unwrap();
        assert_eq!(profile.bio.as_deref(), Some("hello"));
        assert_eq!(store.profile().unwrap().bio.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_delete_account_signs_out() {
        let (store, backend) = store();
        let profile = store.sign_in("ada@example.com", "pw").await.unwrap();

        store.delete_account().await.unwrap();
        assert!(store.current_user().is_none());
        assert!(backend.get_profile(profile.id).await.unwrap().is_none());
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_profile_stays_deleted() {
        let (store, backend) = store();
        store.initialize().await.unwrap();
        let profile = store.sign_in("ada@example.com", "pw").await.unwrap();

        store.delete_account().await.unwrap();
        // Let the listener drain the queued sign-in event
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(backend.get_profile(profile.id).await.unwrap().is_none());
        assert_eq!(backend.count_profiles(false).await.unwrap(), 0);
        assert!(store.profile().is_none());
    }

    #[tokio::test]
    async fn test_failed_update_keeps_profile() {
        let (store, backend) = store();
        let profile = store.sign_in("ada@example.com", "pw").await.unwrap();

        backend
            .database()
            .connection()
            .unwrap()
            .execute_batch("DROP TABLE profiles")
            .unwrap();

        let update = ProfileUpdate {
            bio: Some("hello".to_string()),
            ..Default::default()
        };
        assert!(store.update_profile(&update).await.is_err());
        assert_eq!(store.profile(), Some(profile));
    }

    #[tokio::test]
    async fn test_is_admin_reflects_profile() {
        let (store, backend) = store();
        let profile = store.sign_in("root@example.com", "pw").await.unwrap();
        assert!(!store.is_admin());

        backend.grant_admin(profile.id, true).unwrap();
        store.sign_in("root@example.com", "pw").await.unwrap();
        assert!(store.is_admin());
    }
}
