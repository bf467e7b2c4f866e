use pulse_backend::{BackendError, BackendResult};
use thiserror::Error;

use crate::notice::Notice;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    /// Transient message a front end shows for this failure
    pub fn notice(&self) -> Notice {
        match self {
            ClientError::Backend(e) if e.is_connectivity() => {
                Notice::error("Could not reach the server. Check your connection and sign-in.")
            }
            ClientError::Backend(BackendError::NotFound(_)) | ClientError::NotFound(_) => {
                Notice::error(self.to_string())
            }
            ClientError::Backend(_) => Notice::error("Something went wrong. Please try again."),
            ClientError::NotAuthenticated => Notice::error("Please sign in first."),
            ClientError::Validation(message) => Notice::error(message.clone()),
            ClientError::Forbidden(_) => Notice::error("You do not have permission to do that."),
            ClientError::Storage(_) => Notice::error("Could not save local settings."),
        }
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        ClientError::Storage(format!("{:#}", err))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Log a failed backend call and convert it. Local state is left to the caller.
pub(crate) fn logged<T>(action: &str, result: BackendResult<T>) -> ClientResult<T> {
    result.map_err(|e| {
        log::error!("Error {}: {}", action, e);
        ClientError::from(e)
    })
}
