use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use pulse_backend::Backend;
use pulse_types::{NewNotification, Notification, NotificationKind};

use super::Subscription;
use crate::error::{logged, ClientResult};

/// Most recent notifications fetched by [`NotificationStore::load`]
pub const NOTIFICATION_LIMIT: usize = 50;

/// Notifications held for one recipient, newest first.
///
/// `unread_count` always equals the number of held notifications with
/// `is_read == false`; every mutation below preserves that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationsState {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

impl NotificationsState {
    pub fn from_list(notifications: Vec<Notification>) -> Self {
        let unread_count = notifications.iter().filter(|n| !n.is_read).count();
        Self {
            notifications,
            unread_count,
        }
    }

    /// Prepend a pushed notification. Returns false for one already held.
    pub fn push(&mut self, notification: Notification) -> bool {
        if self.notifications.iter().any(|n| n.id == notification.id) {
            return false;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(0, notification);
        true
    }

    pub fn mark_read(&mut self, id: Uuid) {
        if let Some(notification) = self.notifications.iter_mut().find(|n| n.id == id) {
            if !notification.is_read {
                notification.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
            }
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.notifications {
            notification.is_read = true;
        }
        self.unread_count = 0;
    }

    pub fn remove(&mut self, id: Uuid) {
        if let Some(index) = self.notifications.iter().position(|n| n.id == id) {
            let removed = self.notifications.remove(index);
            if !removed.is_read {
                self.unread_count = self.unread_count.saturating_sub(1);
            }
        }
    }
}

/// Mirror of the signed-in user's notifications with live updates
#[derive(Clone)]
pub struct NotificationStore {
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<NotificationsState>>,
}

impl NotificationStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(NotificationsState::default());
        Self {
            backend,
            state: Arc::new(state),
        }
    }

    pub fn watch(&self) -> watch::Receiver<NotificationsState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> NotificationsState {
        self.state.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.borrow().unread_count
    }

    /// Replace the held list with the recipient's newest notifications
    pub async fn load(&self, recipient_id: Uuid) -> ClientResult<()> {
        let notifications = logged(
            "fetching notifications",
            self.backend
                .list_notifications(recipient_id, NOTIFICATION_LIMIT)
                .await,
        )?;

        let loaded = NotificationsState::from_list(notifications);
        log::debug!(
            "Loaded {} notifications ({} unread)",
            loaded.notifications.len(),
            loaded.unread_count
        );
        self.state.send_replace(loaded);
        Ok(())
    }

    /// Prepend notifications inserted for the recipient from now on
    pub async fn subscribe(&self, recipient_id: Uuid) -> ClientResult<Subscription> {
        let mut feed = logged(
            "subscribing to notifications",
            self.backend.subscribe_notifications(recipient_id).await,
        )?;

        let state = self.state.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = feed.recv().await {
                log::debug!(target: "realtime", "Notification {} pushed", notification.id);
                state.send_if_modified(|s| s.push(notification));
            }
            log::debug!(target: "realtime", "Notification feed for {} closed", recipient_id);
        });

        Ok(Subscription::new(task))
    }

    /// Subscribe, then load. Rows inserted in between arrive through both
    /// paths and are deduplicated.
    pub async fn initialize(&self, recipient_id: Uuid) -> ClientResult<Subscription> {
        let subscription = self.subscribe(recipient_id).await?;
        self.load(recipient_id).await?;
        Ok(subscription)
    }

    pub async fn mark_read(&self, id: Uuid) -> ClientResult<()> {
        logged(
            "marking notification as read",
            self.backend.mark_notification_read(id).await,
        )?;
        self.state.send_modify(|s| s.mark_read(id));
        Ok(())
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> ClientResult<()> {
        logged(
            "marking all notifications as read",
            self.backend.mark_all_notifications_read(recipient_id).await,
        )?;
        self.state.send_modify(NotificationsState::mark_all_read);
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> ClientResult<()> {
        logged(
            "deleting notification",
            self.backend.delete_notification(id).await,
        )?;
        self.state.send_modify(|s| s.remove(id));
        Ok(())
    }

    /// Send a notification to another user
    pub async fn create(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationKind,
        content: &str,
        related_id: Option<Uuid>,
    ) -> ClientResult<()> {
        let notification =
            NewNotification::new(recipient_id, sender_id, kind, content).with_related(related_id);
        logged(
            "creating notification",
            self.backend.insert_notifications(&[notification]).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use pulse_backend::LocalBackend;
    use std::time::Duration;

    fn notification(is_read: bool) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::nil(),
            sender_id: None,
            kind: NotificationKind::Like,
            content: "liked your post".to_string(),
            related_id: None,
            is_read,
            created_at: Utc::now(),
            sender: None,
        }
    }

    fn held_unread(state: &NotificationsState) -> usize {
        state.notifications.iter().filter(|n| !n.is_read).count()
    }

    #[derive(Debug, Clone)]
    enum Op {
        MarkRead(usize),
        Delete(usize),
        MarkAllRead,
        Push(bool),
        MarkUnknown,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..12).prop_map(Op::MarkRead),
            (0usize..12).prop_map(Op::Delete),
            Just(Op::MarkAllRead),
            any::<bool>().prop_map(Op::Push),
            Just(Op::MarkUnknown),
        ]
    }

    proptest! {
        #[test]
        fn unread_count_tracks_held_unread(
            initial in proptest::collection::vec(any::<bool>(), 0..10),
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let mut state = NotificationsState::from_list(
                initial.into_iter().map(notification).collect(),
            );

            for op in ops {
                let ids: Vec<Uuid> = state.notifications.iter().map(|n| n.id).collect();
                match op {
                    Op::MarkRead(i) => {
                        if let Some(id) = ids.get(i) { state.mark_read(*id) }
                    }
                    Op::Delete(i) => {
                        if let Some(id) = ids.get(i) { state.remove(*id) }
                    }
                    Op::MarkAllRead => state.mark_all_read(),
                    Op::Push(is_read) => { state.push(notification(is_read)); }
                    Op::MarkUnknown => {
                        state.mark_read(Uuid::new_v4());
                        state.remove(Uuid::new_v4());
                    }
                }
                prop_assert_eq!(state.unread_count, held_unread(&state));
            }
        }
    }

    #[test]
    fn test_push_ignores_duplicates() {
        let mut state = NotificationsState::default();
        let n = notification(false);
        assert!(state.push(n.clone()));
        assert!(!state.push(n));
        assert_eq!(state.unread_count, 1);
        assert_eq!(state.notifications.len(), 1);
    }

    #[test]
    fn test_mark_read_twice_decrements_once() {
        let mut state = NotificationsState::from_list(vec![notification(false), notification(false)]);
        let id = state.notifications[0].id;
        state.mark_read(id);
        state.mark_read(id);
        assert_eq!(state.unread_count, 1);
    }

    async fn store_with(unread: usize, read: usize) -> (NotificationStore, Arc<LocalBackend>, Uuid) {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let recipient = Uuid::new_v4();
        let mut batch = Vec::new();
        for i in 0..unread + read {
            let mut n = NewNotification::new(recipient, None, NotificationKind::System, format!("n{}", i));
            n.is_read = i >= unread;
            batch.push(n);
        }
        backend.insert_notifications(&batch).await.unwrap();

        let store = NotificationStore::new(backend.clone());
        store.load(recipient).await.unwrap();
        (store, backend, recipient)
    }

    #[tokio::test]
    async fn test_load_counts_unread() {
        let (store, _, _) = store_with(3, 2).await;
        let state = store.snapshot();
        assert_eq!(state.notifications.len(), 5);
        assert_eq!(state.unread_count, 3);
    }

    #[tokio::test]
    async fn test_mark_all_read_zeroes_counter() {
        let (store, backend, recipient) = store_with(5, 0).await;
        store.mark_all_read(recipient).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.unread_count, 0);
        assert!(state.notifications.iter().all(|n| n.is_read));

        let remote = backend.list_notifications(recipient, 50).await.unwrap();
        assert!(remote.iter().all(|n| n.is_read));
    }

    #[tokio::test]
    async fn test_failed_calls_leave_state_unchanged() {
        let (store, backend, recipient) = store_with(2, 1).await;
        let before = store.snapshot();
        let unread_id = before.notifications.iter().find(|n| !n.is_read).unwrap().id;

        backend
            .database()
            .connection()
            .unwrap()
            .execute_batch("DROP TABLE notifications")
            .unwrap();

        assert!(store.mark_read(unread_id).await.is_err());
        assert_eq!(store.snapshot(), before);
        assert!(store.mark_all_read(recipient).await.is_err());
        assert_eq!(store.snapshot(), before);
        assert!(store.delete(unread_id).await.is_err());
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_read_notification_keeps_counter() {
        let (store, _, _) = store_with(2, 1).await;
        let read_id = store
            .snapshot()
            .notifications
            .iter()
            .find(|n| n.is_read)
            .unwrap()
            .id;

        store.delete(read_id).await.unwrap();
        let state = store.snapshot();
        assert_eq!(state.unread_count, 2);
        assert_eq!(state.notifications.len(), 2);
    }

    #[tokio::test]
    async fn test_pushed_notification_increments_counter() {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let recipient = Uuid::new_v4();
        let store = NotificationStore::new(backend.clone());
        let subscription = store.initialize(recipient).await.unwrap();
        let mut rx = store.watch();

        store
            .create(recipient, None, NotificationKind::Follow, "followed you", None)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.unread_count == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.snapshot().notifications[0].content, "followed you");

        subscription.unsubscribe();
        store
            .create(recipient, None, NotificationKind::Follow, "after unsubscribe", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.unread_count(), 1);
    }
}
