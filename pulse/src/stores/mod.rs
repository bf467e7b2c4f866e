//! Client-side state containers.
//!
//! Each container keeps its state in a `tokio::sync::watch` channel: methods
//! mutate it with `send_modify`, and any number of observers read it through
//! `watch()`. Background work (change feeds, periodic refresh) runs in tasks
//! owned by a [`Subscription`].

pub mod auth;
pub mod notifications;
pub mod theme;
pub mod trending;

pub use auth::{AuthState, AuthStore};
pub use notifications::{NotificationStore, NotificationsState};
pub use theme::ThemeStore;
pub use trending::{TrendingState, TrendingStore};

use tokio::task::JoinHandle;

/// Handle to a background task. Dropping it cancels the task.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop the task now
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let subscription = Subscription::new(tokio::spawn(async move {
            let _keep = tx;
            std::future::pending::<()>().await;
        }));
        assert!(subscription.is_active());

        subscription.unsubscribe();
        // The sender is dropped with the aborted task
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
