use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A short-lived message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Fan-out of notices to whichever front end is listening.
/// Notices posted with nobody listening are dropped.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    tx: broadcast::Sender<Notice>,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn post(&self, notice: Notice) {
        log::debug!("Notice ({:?}): {}", notice.level, notice.message);
        let _ = self.tx.send(notice);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.post(Notice::success(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.post(Notice::error(message));
    }

    /// Post the outcome of an operation: `success` on Ok, the error's notice otherwise
    pub fn report<T>(&self, result: &crate::ClientResult<T>, success: &str) {
        match result {
            Ok(_) => self.success(success),
            Err(e) => self.post(e.notice()),
        }
    }
}
