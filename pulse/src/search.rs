use std::sync::Arc;

use pulse_backend::{Backend, PostFilter};
use pulse_types::{Post, Profile};

use crate::error::{logged, ClientResult};
use crate::stores::TrendingStore;

pub const SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Users,
    Posts,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchResults {
    Users(Vec<Profile>),
    Posts(Vec<Post>),
}

impl SearchResults {
    fn empty(kind: SearchKind) -> Self {
        match kind {
            SearchKind::Users => SearchResults::Users(Vec::new()),
            SearchKind::Posts => SearchResults::Posts(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SearchResults::Users(users) => users.len(),
            SearchResults::Posts(posts) => posts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// User and post search. Every non-blank query also counts toward trending.
pub struct Search {
    backend: Arc<dyn Backend>,
    trending: TrendingStore,
}

impl Search {
    pub fn new(backend: Arc<dyn Backend>, trending: TrendingStore) -> Self {
        Self { backend, trending }
    }

    pub async fn search(&self, kind: SearchKind, query: &str) -> ClientResult<SearchResults> {
        let term = query.trim();
        if term.is_empty() {
            return Ok(SearchResults::empty(kind));
        }

        let results = match kind {
            SearchKind::Users => SearchResults::Users(logged(
                "searching users",
                self.backend.search_profiles(term, SEARCH_LIMIT).await,
            )?),
            SearchKind::Posts => SearchResults::Posts(logged(
                "searching posts",
                self.backend
                    .list_posts(&PostFilter::matching(term, SEARCH_LIMIT))
                    .await,
            )?),
        };

        if let Err(e) = self.trending.track_search(term).await {
            log::warn!("Search '{}' was not counted: {}", term, e);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_backend::LocalBackend;
    use pulse_types::{AuthUser, NewPost, UserMetadata};
    use uuid::Uuid;

    async fn seeded() -> (Search, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some("ferris@example.com".to_string()),
            user_metadata: UserMetadata {
                full_name: Some("Ferris Crab".to_string()),
                avatar_url: None,
            },
        };
        backend.insert_profile(&Profile::for_user(&user)).await.unwrap();
        backend
            .insert_post(&NewPost {
                user_id: user.id,
                content: "Learning Rust today".to_string(),
                image_url: None,
                video_url: None,
                audio_url: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let trending = TrendingStore::new(backend.clone());
        (Search::new(backend.clone(), trending), backend)
    }

    #[tokio::test]
    async fn test_search_users_by_display_name() {
        let (search, _) = seeded().await;
        match search.search(SearchKind::Users, "crab").await.unwrap() {
            SearchResults::Users(users) => assert_eq!(users[0].username, "ferris"),
            other => panic!("unexpected results: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_posts_and_track() {
        let (search, backend) = seeded().await;
        let results = search.search(SearchKind::Posts, " RUST ").await.unwrap();
        assert_eq!(results.len(), 1);

        let row = backend
            .find_search_query("rust", Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.search_count, 1);
    }

    #[tokio::test]
    async fn test_blank_query_is_not_tracked() {
        let (search, backend) = seeded().await;
        assert!(search.search(SearchKind::Posts, "   ").await.unwrap().is_empty());
        assert!(backend
            .find_search_query("", Utc::now().date_naive())
            .await
            .unwrap()
            .is_none());
    }
}
