pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod realtime;
pub mod rest;

use std::sync::Arc;

pub use backend::{first_bucket_since, Backend, PostFilter, POSTS_BUCKET};
pub use config::{BackendKind, Settings};
pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use realtime::ChangeFeed;
pub use rest::RestBackend;

/// Build the backend selected by the settings
pub fn connect(settings: &Settings) -> BackendResult<Arc<dyn Backend>> {
    match settings.backend {
        BackendKind::Rest => {
            if settings.remote.anon_key.is_empty() {
                tracing::warn!("No anon key configured; requests may be rejected");
            }
            tracing::info!("Using hosted backend at {}", settings.remote.url);
            Ok(Arc::new(RestBackend::new(&settings.remote)))
        }
        BackendKind::Local => {
            tracing::info!("Using local database at {}", settings.local.database_path);
            Ok(Arc::new(LocalBackend::open(&settings.local.database_path)?))
        }
    }
}
