use std::sync::Arc;

use async_trait::async_trait;
use shared_proto::message::SendMessageRequest;
use uuid::Uuid;

use super::domain::{Conversation, Message, SendFailure, StatusDelta, ThreadSnapshot};
use super::error::MessagingError;
use super::store::{Applied, ConversationStore, LoadOlder, MergeSummary};
use crate::validation::{
    describe, validate_can_message, validate_message_body, validate_template_id,
};

/// Outbound half of the conversation API.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, MessagingError>;
}

/// Drives one conversation view: history through the store, sends through
/// the API with an optimistic placeholder in between.
#[derive(Clone)]
pub struct MessagingService {
    sender: Arc<dyn MessageSender>,
    store: Arc<ConversationStore>,
    conversation: Conversation,
}

impl MessagingService {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        store: Arc<ConversationStore>,
        conversation: Conversation,
    ) -> Self {
        Self {
            sender,
            store,
            conversation,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<ThreadSnapshot> {
        self.store.snapshot()
    }

    pub async fn load_initial(&self) -> Result<Arc<ThreadSnapshot>, MessagingError> {
        self.store.load_initial(&self.conversation.id).await
    }

    pub async fn load_older(&self) -> Result<LoadOlder, MessagingError> {
        self.store.load_older().await
    }

    pub async fn refresh(&self) -> Result<MergeSummary, MessagingError> {
        self.store.refresh().await
    }

    pub fn apply_status(&self, delta: StatusDelta) -> Result<Applied, MessagingError> {
        self.store.apply_status(delta)
    }

    /// Validates and posts a new message.
    ///
    /// A placeholder is visible in the thread before the request goes out.
    /// On failure it stays in the thread as `failed` and the returned
    /// [`MessagingError::SendFailed`] carries its local id for [`Self::retry`].
    pub async fn send(
        &self,
        body: &str,
        template_id: Option<&str>,
    ) -> Result<Message, MessagingError> {
        validate_can_message(&self.conversation)
            .and_then(|_| validate_message_body(body))
            .and_then(|_| template_id.map_or(Ok(()), validate_template_id))
            .map_err(|e| MessagingError::Validation(describe(&e)))?;

        let local_id = format!("local-{}", Uuid::new_v4());
        self.store.append_optimistic(&local_id, body)?;

        let request = SendMessageRequest {
            body: body.to_string(),
            template_id: template_id.map(str::to_string),
        };
        self.post(local_id, request).await
    }

    /// Posts a failed message again under the same local id.
    pub async fn retry(&self, local_id: &str) -> Result<Message, MessagingError> {
        validate_can_message(&self.conversation)
            .map_err(|e| MessagingError::Validation(describe(&e)))?;

        let pending = self.store.mark_resending(local_id)?;
        tracing::info!(
            component = "messaging.service",
            local_id,
            "retrying failed message"
        );

        let request = SendMessageRequest {
            body: pending.body,
            template_id: None,
        };
        self.post(local_id.to_string(), request).await
    }

    pub fn dismiss(&self, local_id: &str) -> Result<Message, MessagingError> {
        self.store.dismiss(local_id)
    }

    pub fn close(&self) {
        self.store.close();
    }

    async fn post(
        &self,
        local_id: String,
        request: SendMessageRequest,
    ) -> Result<Message, MessagingError> {
        match self.sender.send(&self.conversation.id, &request).await {
            Ok(server) => {
                let server_id = server.id.clone();
                if let Err(err) = self.store.reconcile_sent(&local_id, server.clone()) {
                    // The view moved on while the request was out; the send itself went through.
                    tracing::warn!(
                        component = "messaging.service",
                        local_id = %local_id,
                        message_id = %server_id,
                        error = %err,
                        "sent message not reconciled into thread"
                    );
                    let mut sent = server;
                    sent.client_id = Some(local_id);
                    return Ok(sent);
                }
                tracing::info!(
                    component = "messaging.service",
                    local_id = %local_id,
                    message_id = %server_id,
                    "message sent"
                );

                Ok(self
                    .store
                    .snapshot()
                    .get(&server_id)
                    .cloned()
                    .unwrap_or(server))
            }
            Err(err) => {
                let mut failure = SendFailure::new(err.to_string());
                if let MessagingError::Fetch {
                    status: Some(status),
                    ..
                } = &err
                {
                    failure = failure.with_code(status.to_string());
                }

                tracing::warn!(
                    component = "messaging.service",
                    local_id = %local_id,
                    retryable = err.retryable(),
                    error = %err,
                    "message send failed"
                );
                if let Err(store_err) = self.store.mark_failed(&local_id, failure) {
                    tracing::debug!(
                        component = "messaging.service",
                        local_id = %local_id,
                        error = %store_err,
                        "failed send not recorded"
                    );
                }

                Err(MessagingError::SendFailed {
                    local_id,
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::clock::ManualClock;
    use crate::messaging::domain::{
        ConversationStatus, Direction, HistoryPage, MessageStatus, Pagination,
    };
    use crate::messaging::store::{HistorySource, PageRequest};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct OnePage(Vec<Message>);

    #[async_trait]
    impl HistorySource for OnePage {
        async fn fetch_page(
            &self,
            _conversation_id: &str,
            _page: &PageRequest,
        ) -> Result<HistoryPage, MessagingError> {
            Ok(HistoryPage {
                data: self.0.clone(),
                pagination: Pagination {
                    total: self.0.len() as u64,
                    limit: 50,
                    offset: 0,
                    has_more: false,
                },
            })
        }
    }

    #[derive(Default)]
    struct FakeSender {
        replies: Mutex<VecDeque<Result<Message, MessagingError>>>,
        requests: Mutex<Vec<SendMessageRequest>>,
    }

    impl FakeSender {
        fn reply(&self, result: Result<Message, MessagingError>) {
            self.replies.lock().unwrap().push_back(result);
        }

        fn requests(&self) -> Vec<SendMessageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for FakeSender {
        async fn send(
            &self,
            _conversation_id: &str,
            request: &SendMessageRequest,
        ) -> Result<Message, MessagingError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MessagingError::network("no scripted reply")))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 12, 9, 0, 0).unwrap()
    }

    fn conversation() -> Conversation {
        Conversation {
            id: "conv-1".to_string(),
            patient_phone: "+15551234567".to_string(),
            friendly_name: "Jordan P.".to_string(),
            status: ConversationStatus::Active,
            opted_out: false,
            last_message_at: None,
            unread_count: 1,
        }
    }

    fn message(id: &str, direction: Direction, status: MessageStatus, at: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            direction,
            body: format!("body of {id}"),
            status,
            created_on: at.to_string(),
            error_code: None,
            error_message: None,
            client_id: None,
        }
    }

    async fn service_with(
        conversation: Conversation,
        sender: Arc<FakeSender>,
    ) -> MessagingService {
        let inbound = message(
            "SM1",
            Direction::Inbound,
            MessageStatus::Delivered,
            "2026-02-12T08:55:00Z",
        );
        let store = ConversationStore::new(
            Arc::new(OnePage(vec![inbound])),
            Arc::new(ManualClock::new(t0())),
        );
        let service = MessagingService::new(sender, Arc::new(store), conversation);
        service.load_initial().await.expect("initial page");
        service
    }

    #[tokio::test]
    async fn successful_send_replaces_placeholder() {
        let sender = Arc::new(FakeSender::default());
        sender.reply(Ok(message(
            "SM2",
            Direction::Outbound,
            MessageStatus::Sending,
            "2026-02-12T09:00:01Z",
        )));
        let service = service_with(conversation(), sender.clone()).await;

        let sent = service.send("On my way", None).await.expect("sent");

        assert_eq!(sent.id, "SM2");
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.client_id.as_deref().is_some_and(|id| id.starts_with("local-")));

        let snapshot = service.snapshot();
        let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["SM1", "SM2"]);
        assert_eq!(sender.requests()[0].body, "On my way");
    }

    #[tokio::test]
    async fn failed_send_keeps_reason_and_can_be_retried() {
        let sender = Arc::new(FakeSender::default());
        sender.reply(Err(MessagingError::Fetch {
            status: Some(503),
            message: "service unavailable".to_string(),
        }));
        let service = service_with(conversation(), sender.clone()).await;

        let err = service
            .send("Your results are ready", Some("results-ready"))
            .await
            .expect_err("503");
        let MessagingError::SendFailed { local_id, source } = &err else {
            panic!("expected SendFailed, got {err:?}");
        };
        assert!(err.retryable());
        assert!(matches!(**source, MessagingError::Fetch { .. }));

        let failed = service.snapshot().get(local_id).cloned().expect("placeholder kept");
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("503"));
        assert!(failed.error_message.is_some());

        sender.reply(Ok(message(
            "SM9",
            Direction::Outbound,
            MessageStatus::Sent,
            "2026-02-12T09:00:05Z",
        )));
        let sent = service.retry(local_id).await.expect("retry");
        assert_eq!(sent.id, "SM9");
        assert_eq!(sent.client_id.as_deref(), Some(local_id.as_str()));
        assert!(service.snapshot().get(local_id).is_none());

        let requests = sender.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].body, "Your results are ready");
    }

    #[tokio::test]
    async fn dismissed_failure_leaves_the_thread() {
        let sender = Arc::new(FakeSender::default());
        sender.reply(Err(MessagingError::Validation(
            "400 Bad Request: unsubscribed recipient".to_string(),
        )));
        let service = service_with(conversation(), sender).await;

        let err = service.send("hello", None).await.expect_err("rejected");
        assert!(!err.retryable());
        let MessagingError::SendFailed { local_id, .. } = err else {
            panic!("expected SendFailed");
        };

        let removed = service.dismiss(&local_id).expect("dismiss");
        assert_eq!(removed.status, MessageStatus::Failed);
        assert_eq!(service.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn opted_out_patient_is_never_posted() {
        let sender = Arc::new(FakeSender::default());
        let mut opted_out = conversation();
        opted_out.opted_out = true;
        let service = service_with(opted_out, sender.clone()).await;

        let err = service.send("hello", None).await.expect_err("opted out");

        assert!(matches!(err, MessagingError::Validation(_)));
        assert!(sender.requests().is_empty());
        assert_eq!(service.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn blank_body_is_rejected_before_the_placeholder() {
        let sender = Arc::new(FakeSender::default());
        let service = service_with(conversation(), sender.clone()).await;

        let err = service.send("   ", None).await.expect_err("blank");

        assert!(matches!(err, MessagingError::Validation(ref m) if m == "message body is empty"));
        assert_eq!(service.snapshot().len(), 1);
        assert!(sender.requests().is_empty());
    }
}
