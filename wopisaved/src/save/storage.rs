use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use wopi_core::{PutFileRequest, WopiClient, WopiError};

use super::request::PersistRequest;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage rejected upload: {message}")]
    Transport {
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
}

impl PersistError {
    pub fn transient(message: impl Into<String>) -> Self {
        PersistError::Transport {
            message: message.into(),
            retryable: true,
            retry_after: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        PersistError::Transport {
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PersistError::Transport { retryable, .. } => *retryable,
            PersistError::Timeout(_) => true,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PersistError::Transport { retry_after, .. } => *retry_after,
            PersistError::Timeout(_) => None,
        }
    }
}

impl From<WopiError> for PersistError {
    fn from(err: WopiError) -> Self {
        PersistError::Transport {
            retryable: err.is_retryable(),
            retry_after: err.retry_after_secs().map(Duration::from_secs),
            message: err.to_string(),
        }
    }
}

/// The outbound side of a persist: one request, one outcome.
#[async_trait]
pub trait PersistClient: Send + Sync + 'static {
    async fn persist(&self, request: &PersistRequest) -> Result<(), PersistError>;
}

#[async_trait]
impl PersistClient for WopiClient {
    async fn persist(&self, request: &PersistRequest) -> Result<(), PersistError> {
        self.put_file(&PutFileRequest::from(request)).await?;
        Ok(())
    }
}
