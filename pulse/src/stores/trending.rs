use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use pulse_backend::{Backend, BackendError};
use pulse_types::{NewSearchQuery, TrendingTopic};

use super::Subscription;
use crate::error::{logged, ClientError, ClientResult};

/// Searches a term needs within the window to trend
pub const MIN_TRENDING_COUNT: i64 = 1000;
pub const TRENDING_LIMIT: usize = 10;
/// Refresh the topic list whenever a bucket count hits a multiple of this
pub const REFRESH_EVERY: i64 = 100;
pub const TRENDING_WINDOW_HOURS: i64 = 24;
/// Buckets older than this many days are removed by cleanup
pub const RETENTION_DAYS: i64 = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendingState {
    pub topics: Vec<TrendingTopic>,
    pub loading: bool,
}

/// Lowercased, trimmed search term, or `None` when it is too short to count
pub fn normalize_query(term: &str) -> Option<String> {
    let normalized = term.trim().to_lowercase();
    if normalized.chars().count() < 2 {
        return None;
    }
    Some(normalized)
}

/// Daily search counters and the terms currently trending
#[derive(Clone)]
pub struct TrendingStore {
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<TrendingState>>,
}

impl TrendingStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(TrendingState::default());
        Self {
            backend,
            state: Arc::new(state),
        }
    }

    pub fn watch(&self) -> watch::Receiver<TrendingState> {
        self.state.subscribe()
    }

    pub fn topics(&self) -> Vec<TrendingTopic> {
        self.state.borrow().topics.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Reload the top terms of the last 24 hours
    pub async fn fetch_top(&self) -> ClientResult<()> {
        self.state.send_modify(|s| s.loading = true);

        let since = Utc::now() - ChronoDuration::hours(TRENDING_WINDOW_HOURS);
        let result = logged(
            "fetching trending topics",
            self.backend
                .top_search_queries(MIN_TRENDING_COUNT, since, TRENDING_LIMIT)
                .await,
        );

        self.state.send_modify(|s| {
            s.loading = false;
            if let Ok(topics) = &result {
                s.topics = topics.clone();
            }
        });

        let topics = result?;
        log::debug!("Fetched {} trending topics", topics.len());
        Ok(())
    }

    /// Count one search of `term` in today's bucket.
    ///
    /// Returns the bucket's new count, or `None` when the term was ignored.
    pub async fn track_search(&self, term: &str) -> ClientResult<Option<i64>> {
        let Some(query) = normalize_query(term) else {
            return Ok(None);
        };
        let today = Utc::now().date_naive();

        let existing = logged(
            "looking up search query",
            self.backend.find_search_query(&query, today).await,
        )?;

        let count = match existing {
            Some(row) => {
                let count = row.search_count + 1;
                logged(
                    "updating search count",
                    self.backend.set_search_count(row.id, count).await,
                )?;
                count
            }
            None => {
                let entry = NewSearchQuery {
                    query: query.clone(),
                    search_count: 1,
                    created_date: today,
                };
                match self.backend.insert_search_query(&entry).await {
                    Ok(row) => row.search_count,
                    // Another client created today's bucket first
                    Err(BackendError::Conflict(_)) => {
                        let row = logged(
                            "looking up search query",
                            self.backend.find_search_query(&query, today).await,
                        )?
                        .ok_or_else(|| ClientError::NotFound(format!("Search bucket '{}'", query)))?;
                        let count = row.search_count + 1;
                        logged(
                            "updating search count",
                            self.backend.set_search_count(row.id, count).await,
                        )?;
                        count
                    }
                    Err(e) => return logged("tracking search", Err(e)),
                }
            }
        };

        log::debug!("Search '{}' counted {} times today", query, count);
        if count % REFRESH_EVERY == 0 {
            self.fetch_top().await?;
        }
        Ok(Some(count))
    }

    /// Remove buckets older than the retention period
    pub async fn cleanup(&self) -> ClientResult<()> {
        let cutoff = (Utc::now() - ChronoDuration::days(RETENTION_DAYS)).date_naive();
        logged(
            "cleaning up search queries",
            self.backend.delete_search_queries_before(cutoff).await,
        )?;
        log::info!("Removed search buckets before {}", cutoff);
        Ok(())
    }

    /// Re-fetch the top terms every `interval` until the handle is dropped
    pub fn spawn_refresh(&self, interval: Duration) -> Subscription {
        let store = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Failures are logged by fetch_top
                let _ = store.fetch_top().await;
            }
        });
        Subscription::new(task)
    }
}
