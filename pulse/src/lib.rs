//! Client state layer for Pulse.
//!
//! Containers in [`stores`] mirror the signed-in user's session, notifications,
//! trending topics and theme, and keep themselves current from the backend's
//! change feeds. The remaining modules are the screens' operations (feed,
//! composer, search, profile, admin) expressed as plain async calls.

#[macro_use]
pub mod logging;

pub mod admin;
pub mod compose;
pub mod error;
pub mod feed;
pub mod notice;
pub mod preferences;
pub mod profile;
pub mod search;
pub mod session;
pub mod stores;

pub use admin::{AdminConsole, AdminStats, Recipients};
pub use compose::{Attachment, Composer, Draft};
pub use error::{ClientError, ClientResult};
pub use feed::{FeedState, FeedStore};
pub use notice::{Notice, NoticeBoard, NoticeLevel};
pub use profile::ProfileView;
pub use search::{Search, SearchKind, SearchResults};
pub use stores::{
    AuthState, AuthStore, NotificationStore, NotificationsState, Subscription, ThemeStore,
    TrendingState, TrendingStore,
};
