use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::BackendResult;

/// Owned stream of real-time insert events.
///
/// Events are forwarded by a background task; dropping the feed aborts that
/// task, which is how a subscription is cancelled.
pub struct ChangeFeed<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    task: JoinHandle<()>,
}

impl<T> ChangeFeed<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>, task: JoinHandle<()>) -> Self {
        Self { receiver, task }
    }

    /// Wait for the next event. Returns `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Stop delivery. Equivalent to dropping the feed.
    pub fn close(self) {}
}

impl<T> Drop for ChangeFeed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Forward events from an in-process broadcast channel, keeping those that
/// match `filter`.
///
/// The broadcast receiver must be created before this is called so that no
/// event published after subscription is missed.
pub fn forward_broadcast<T, F>(mut source: broadcast::Receiver<T>, filter: F) -> ChangeFeed<T>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        loop {
            match source.recv().await {
                Ok(event) => {
                    if filter(&event) && tx.send(event).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change feed lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    ChangeFeed::new(rx, task)
}

/// Emulate a push channel by calling `fetch` on a fixed interval and
/// forwarding every row it returns. `fetch` owns its own cursor.
pub fn poll_feed<T, F, Fut>(interval: Duration, mut fetch: F) -> ChangeFeed<T>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = BackendResult<Vec<T>>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match fetch().await {
                Ok(rows) => {
                    for row in rows {
                        if tx.send(row).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Realtime poll failed: {}", e);
                }
            }
        }
    });
    ChangeFeed::new(rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_broadcast_feed_filters_events() {
        let (tx, _) = broadcast::channel(16);
        let mut feed = forward_broadcast(tx.subscribe(), |n: &u32| n % 2 == 0);

        for n in 1..=4u32 {
            tx.send(n).unwrap();
        }

        assert_eq!(feed.recv().await, Some(2));
        assert_eq!(feed.recv().await, Some(4));
    }

    #[tokio::test]
    async fn test_broadcast_feed_ends_when_source_closes() {
        let (tx, _) = broadcast::channel::<u32>(4);
        let mut feed = forward_broadcast(tx.subscribe(), |_| true);
        drop(tx);
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn test_poll_feed_forwards_rows() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut feed = poll_feed(Duration::from_millis(5), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(vec![n]) }
        });

        assert_eq!(feed.recv().await, Some(0));
        assert_eq!(feed.recv().await, Some(1));
        feed.close();
    }
}
