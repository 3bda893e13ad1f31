use async_trait::async_trait;
use shared_proto::message::SendMessageRequest;

use super::ApiClient;
use crate::messaging::domain::{Conversation, HistoryPage, Message};
use crate::messaging::error::MessagingError;
use crate::messaging::service::MessageSender;
use crate::messaging::store::{HistorySource, PageRequest};
use crate::protocol::{CONVERSATIONS_PATH, MESSAGES_SEGMENT};

impl ApiClient {
    pub async fn fetch_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, MessagingError> {
        let url = self.endpoint(&[CONVERSATIONS_PATH, conversation_id])?;
        self.execute(self.client.get(url), "fetch_conversation").await
    }

    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        page: &PageRequest,
    ) -> Result<HistoryPage, MessagingError> {
        let url = self.endpoint(&[CONVERSATIONS_PATH, conversation_id, MESSAGES_SEGMENT])?;

        let mut query = vec![
            ("limit", page.limit.to_string()),
            ("offset", page.offset.to_string()),
        ];
        if let Some(before) = &page.before {
            query.push(("before", before.clone()));
        }

        self.execute(self.client.get(url).query(&query), "fetch_messages")
            .await
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, MessagingError> {
        let url = self.endpoint(&[CONVERSATIONS_PATH, conversation_id, MESSAGES_SEGMENT])?;
        self.execute(self.client.post(url).json(request), "send_message")
            .await
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        page: &PageRequest,
    ) -> Result<HistoryPage, MessagingError> {
        self.fetch_messages(conversation_id, page).await
    }
}

#[async_trait]
impl MessageSender for ApiClient {
    async fn send(
        &self,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, MessagingError> {
        self.send_message(conversation_id, request).await
    }
}
