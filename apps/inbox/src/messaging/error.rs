use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MessagingError {
    /// Transport failure, server-side error or rejected credentials.
    #[error("fetch failed: {message}")]
    Fetch {
        status: Option<u16>,
        message: String,
    },

    /// Request rejected by the API or by local checks. Needs user edits.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("send of {local_id} failed: {source}")]
    SendFailed {
        local_id: String,
        #[source]
        source: Box<MessagingError>,
    },

    #[error("message {0} already exists")]
    DuplicateMessage(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("result belongs to a conversation view that was reloaded")]
    Superseded,

    #[error("conversation view is closed")]
    Detached,
}

impl MessagingError {
    pub fn network(message: impl Into<String>) -> Self {
        MessagingError::Fetch {
            status: None,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            // Retrying with the same credentials will not help.
            MessagingError::Fetch { status, .. } => !matches!(status, Some(401 | 403)),
            MessagingError::SendFailed { source, .. } => source.retryable(),
            _ => false,
        }
    }
}
