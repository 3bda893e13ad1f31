use serde::Serialize;

use crate::messaging::error::MessagingError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorCode {
    Network,
    Protocol,
    Auth,
    Validation,
    Config,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: AppErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retryable: false,
            trace_id: Some(crate::observability::trace_id().to_string()),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Network, message).retryable()
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Protocol, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Validation, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Config, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Internal, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.message, details),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl From<MessagingError> for AppError {
    fn from(value: MessagingError) -> Self {
        let details = value.to_string();
        match value {
            MessagingError::Fetch {
                status: Some(401 | 403),
                ..
            } => AppError::auth("Not authorized for this conversation").with_details(details),
            MessagingError::Fetch { .. } => {
                AppError::network("Conversation API unavailable").with_details(details)
            }
            MessagingError::SendFailed { ref source, .. } if source.retryable() => {
                AppError::network("Message could not be sent").with_details(details)
            }
            MessagingError::SendFailed { .. } | MessagingError::Validation(_) => {
                AppError::validation("Message rejected").with_details(details)
            }
            MessagingError::Protocol(_) => {
                AppError::protocol("Unexpected API response").with_details(details)
            }
            MessagingError::DuplicateMessage(_)
            | MessagingError::UnknownMessage(_)
            | MessagingError::InvalidOperation(_)
            | MessagingError::Superseded
            | MessagingError::Detached => {
                AppError::internal("Conversation view error").with_details(details)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_error_payload_shape() {
        let err = AppError::network("Conversation API unavailable").with_details("socket timeout");
        let json = serde_json::to_value(err).expect("serialize app error");

        assert_eq!(json["code"], "network");
        assert_eq!(json["message"], "Conversation API unavailable");
        assert_eq!(json["details"], "socket timeout");
        assert_eq!(json["retryable"], true);
        assert!(json.get("trace_id").is_some());
    }

    #[test]
    fn maps_messaging_errors_by_kind() {
        let unauthorized = AppError::from(MessagingError::Fetch {
            status: Some(401),
            message: "expired token".to_string(),
        });
        assert_eq!(unauthorized.code, AppErrorCode::Auth);
        assert!(!unauthorized.retryable);

        let outage = AppError::from(MessagingError::network("connection refused"));
        assert_eq!(outage.code, AppErrorCode::Network);
        assert!(outage.retryable);

        let rejected = AppError::from(MessagingError::SendFailed {
            local_id: "local-1".to_string(),
            source: Box::new(MessagingError::Validation("opted out".to_string())),
        });
        assert_eq!(rejected.code, AppErrorCode::Validation);
    }
}
