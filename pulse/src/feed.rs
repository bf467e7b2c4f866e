use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use pulse_backend::{Backend, PostFilter};
use pulse_types::{Post, PostLike};

use crate::error::{logged, ClientResult};
use crate::stores::Subscription;

/// Posts shown on the news feed
pub const FEED_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub loading: bool,
    /// Posts the viewer liked during this session
    pub liked: HashSet<Uuid>,
}

#[derive(Clone)]
pub struct FeedStore {
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<FeedState>>,
}

impl FeedStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            backend,
            state: Arc::new(state),
        }
    }

    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.borrow().posts.clone()
    }

    pub fn is_liked(&self, post_id: Uuid) -> bool {
        self.state.borrow().liked.contains(&post_id)
    }

    pub async fn load(&self) -> ClientResult<()> {
        self.state.send_modify(|s| s.loading = true);
        let result = logged(
            "fetching posts",
            self.backend.list_posts(&PostFilter::latest(FEED_LIMIT)).await,
        );
        self.state.send_modify(|s| {
            s.loading = false;
            if let Ok(posts) = &result {
                s.posts = posts.clone();
            }
        });
        result.map(|_| ())
    }

    /// Reload the feed whenever someone publishes a post
    pub async fn subscribe(&self) -> ClientResult<Subscription> {
        let mut feed = logged("subscribing to posts", self.backend.subscribe_posts().await)?;
        let store = self.clone();
        let task = tokio::spawn(async move {
            while let Some(post) = feed.recv().await {
                log::debug!(target: "realtime", "Post {} published, reloading feed", post.id);
                let _ = store.load().await;
            }
        });
        Ok(Subscription::new(task))
    }

    pub async fn like(&self, viewer_id: Uuid, post_id: Uuid) -> ClientResult<()> {
        let like = PostLike { post_id, user_id: viewer_id };
        logged("liking post", self.backend.like_post(&like).await)?;
        self.state.send_modify(|s| {
            if s.liked.insert(post_id) {
                if let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) {
                    post.likes_count += 1;
                }
            }
        });
        Ok(())
    }

    pub async fn unlike(&self, viewer_id: Uuid, post_id: Uuid) -> ClientResult<()> {
        let like = PostLike { post_id, user_id: viewer_id };
        logged("unliking post", self.backend.unlike_post(&like).await)?;
        self.state.send_modify(|s| {
            if s.liked.remove(&post_id) {
                if let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) {
                    post.likes_count = (post.likes_count - 1).max(0);
                }
            }
        });
        Ok(())
    }

    /// Like or unlike; returns whether the post is now liked
    pub async fn toggle_like(&self, viewer_id: Uuid, post_id: Uuid) -> ClientResult<bool> {
        if self.is_liked(post_id) {
            self.unlike(viewer_id, post_id).await?;
            Ok(false)
        } else {
            self.like(viewer_id, post_id).await?;
            Ok(true)
        }
    }

    pub async fn delete_post(&self, post_id: Uuid) -> ClientResult<()> {
        logged("deleting post", self.backend.delete_post(post_id).await)?;
        self.state.send_modify(|s| {
            s.posts.retain(|p| p.id != post_id);
            s.liked.remove(&post_id);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use pulse_backend::LocalBackend;
    use pulse_types::NewPost;
    use std::time::Duration;

    fn new_post(user_id: Uuid, content: &str, minutes_ago: i64) -> NewPost {
        NewPost {
            user_id,
            content: content.to_string(),
            image_url: Some("local://posts/images/x.png".to_string()),
            video_url: None,
            audio_url: None,
            created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_load_newest_first() {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let author = Uuid::new_v4();
        backend.insert_post(&new_post(author, "older", 10)).await.unwrap();
        backend.insert_post(&new_post(author, "newer", 1)).await.unwrap();

        let feed = FeedStore::new(backend);
        feed.load().await.unwrap();

        let contents: Vec<String> = feed.posts().into_iter().map(|p| p.content).collect();
        assert_eq!(contents, vec!["newer", "older"]);
        assert!(!feed.watch().borrow().loading);
    }

    #[tokio::test]
    async fn test_toggle_like_adjusts_count() {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let viewer = Uuid::new_v4();
        let post = backend.insert_post(&new_post(Uuid::new_v4(), "hello", 0)).await.unwrap();

        let feed = FeedStore::new(backend.clone());
        feed.load().await.unwrap();

        assert!(feed.toggle_like(viewer, post.id).await.unwrap());
        assert_eq!(feed.posts()[0].likes_count, 1);
        let remote = backend.list_posts(&PostFilter::latest(10)).await.unwrap();
        assert_eq!(remote[0].likes_count, 1);

        assert!(!feed.toggle_like(viewer, post.id).await.unwrap());
        assert_eq!(feed.posts()[0].likes_count, 0);
        assert!(!feed.is_liked(post.id));
    }

    #[tokio::test]
    async fn test_delete_post() {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let post = backend.insert_post(&new_post(Uuid::new_v4(), "bye", 0)).await.unwrap();
        let feed = FeedStore::new(backend.clone());
        feed.load().await.unwrap();

        feed.delete_post(post.id).await.unwrap();
        assert!(feed.posts().is_empty());
        assert_eq!(backend.count_posts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscription_reloads_on_insert() {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let feed = FeedStore::new(backend.clone());
        feed.load().await.unwrap();
        let _subscription = feed.subscribe().await.unwrap();
        let mut rx = feed.watch();

        backend.insert_post(&new_post(Uuid::new_v4(), "fresh", 0)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.posts.len() == 1))
            .await
            .unwrap()
            .unwrap();
    }
}
