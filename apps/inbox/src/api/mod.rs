pub mod messages;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use url::Url;

use crate::messaging::error::MessagingError;
use crate::observability;
use crate::protocol::{HEADER_REQUEST_ID, HEADER_TRACE_ID, USER_AGENT};

/// Shared HTTP state for all conversation API requests.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, MessagingError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MessagingError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn set_token(&self, token: Option<String>) {
        let mut write_guard = self.token.write().await;
        *write_guard = token;
    }

    pub async fn get_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MessagingError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MessagingError::Protocol(format!("base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Attaches auth and correlation headers.
    async fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request_id = observability::request_id();
        let request = request
            .header(HEADER_TRACE_ID, observability::trace_id())
            .header(HEADER_REQUEST_ID, &request_id);
        match self.get_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, MessagingError> {
        let response = self
            .prepare(request)
            .await
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(component = "api", operation, error = %e, "request failed");
                MessagingError::network(format!("{operation}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = error_for_status(status, response).await;
            tracing::warn!(
                component = "api",
                operation,
                status = status.as_u16(),
                error = %err,
                "request rejected"
            );
            return Err(err);
        }

        tracing::debug!(component = "api", operation, status = status.as_u16(), "request ok");
        response
            .json::<T>()
            .await
            .map_err(|e| MessagingError::Protocol(format!("{operation}: {e}")))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Maps a non-success response onto the messaging error taxonomy.
async fn error_for_status(status: StatusCode, response: Response) -> MessagingError {
    let text = response.text().await.unwrap_or_default();
    let message = if text.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", text.trim())
    };

    let fetch_failure = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN;
    if fetch_failure {
        MessagingError::Fetch {
            status: Some(status.as_u16()),
            message,
        }
    } else {
        MessagingError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() {
        let client = ApiClient::new(
            Url::parse("https://api.example.test/v1").expect("url"),
            Duration::from_secs(5),
        )
        .expect("client");

        let url = client
            .endpoint(&["conversations", "conv 1", "messages"])
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/conversations/conv%201/messages"
        );
    }
}
