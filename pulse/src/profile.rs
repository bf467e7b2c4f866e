use std::sync::Arc;

use pulse_backend::{Backend, PostFilter};
use pulse_types::{Post, Profile};

use crate::error::{logged, ClientError, ClientResult};

/// Posts listed on a profile page
pub const PROFILE_POSTS_LIMIT: usize = 100;

/// A user's profile with their posts, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub profile: Profile,
    pub posts: Vec<Post>,
}

impl ProfileView {
    pub async fn load(backend: &Arc<dyn Backend>, username: &str) -> ClientResult<Self> {
        let username = username.trim().trim_start_matches('@');
        let profile = logged(
            "fetching profile",
            backend.get_profile_by_username(username).await,
        )?
        .ok_or_else(|| ClientError::NotFound(format!("User @{}", username)))?;

        let posts = logged(
            "fetching user posts",
            backend
                .list_posts(&PostFilter::by_author(profile.id, PROFILE_POSTS_LIMIT))
                .await,
        )?;

        Ok(Self { profile, posts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pulse_backend::LocalBackend;
    use pulse_types::{AuthUser, NewPost, UserMetadata};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::in_memory().unwrap());
        let err = ProfileView::load(&backend, "nobody").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_loads_only_own_posts() {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::in_memory().unwrap());
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some("ada@example.com".to_string()),
            user_metadata: UserMetadata::default(),
        };
        backend.insert_profile(&Profile::for_user(&user)).await.unwrap();

        for (author, content, age) in [
            (user.id, "first", 5),
            (Uuid::new_v4(), "someone else", 3),
            (user.id, "second", 1),
        ] {
            backend
                .insert_post(&NewPost {
                    user_id: author,
                    content: content.to_string(),
                    image_url: None,
                    video_url: None,
                    audio_url: None,
                    created_at: Utc::now() - Duration::minutes(age),
                })
                .await
                .unwrap();
        }

        let view = ProfileView::load(&backend, "@ada").await.unwrap();
        assert_eq!(view.profile.id, user.id);
        let contents: Vec<&str> = view.posts.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
    }
}
