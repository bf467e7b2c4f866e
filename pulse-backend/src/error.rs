use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Network and authorization failures, as opposed to bad input or missing rows
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BackendError::Network(_) | BackendError::Unauthorized(_))
    }
}

impl From<anyhow::Error> for BackendError {
    fn from(err: anyhow::Error) -> Self {
        BackendError::Internal(format!("{:#}", err))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
