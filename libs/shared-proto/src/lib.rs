//! Wire types of the conversation API. Field names follow the API's camelCase JSON.

pub mod message {
    use serde::{Deserialize, Serialize};

    pub const MAX_BODY_CHARS: usize = 1600;

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "snake_case")]
    pub enum Direction {
        Inbound,
        Outbound,
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "snake_case")]
    pub enum MessageStatus {
        #[serde(alias = "queued", alias = "accepted", alias = "scheduled")]
        Sending,
        Sent,
        #[serde(alias = "received")]
        Delivered,
        Read,
        #[serde(alias = "undelivered", alias = "canceled")]
        Failed,
    }

    impl MessageStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                MessageStatus::Sending => "sending",
                MessageStatus::Sent => "sent",
                MessageStatus::Delivered => "delivered",
                MessageStatus::Read => "read",
                MessageStatus::Failed => "failed",
            }
        }

        pub fn is_terminal(self) -> bool {
            matches!(
                self,
                MessageStatus::Delivered | MessageStatus::Read | MessageStatus::Failed
            )
        }

        fn rank(self) -> u8 {
            match self {
                MessageStatus::Sending => 0,
                MessageStatus::Sent => 1,
                MessageStatus::Delivered => 2,
                MessageStatus::Read => 3,
                MessageStatus::Failed => 0,
            }
        }

        /// Status after applying `next` on top of `self`.
        ///
        /// Progress is monotonic: a late `sent` never downgrades a `read`
        /// message. `failed` can only be entered before delivery and is only
        /// left through an explicit resend, which does not go through here.
        pub fn merge(self, next: MessageStatus) -> MessageStatus {
            match (self, next) {
                (MessageStatus::Failed, _) => MessageStatus::Failed,
                (MessageStatus::Sending | MessageStatus::Sent, MessageStatus::Failed) => {
                    MessageStatus::Failed
                }
                (_, MessageStatus::Failed) => self,
                _ if next.rank() > self.rank() => next,
                _ => self,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Message {
        pub id: String,
        pub conversation_id: String,
        pub direction: Direction,
        pub body: String,
        pub status: MessageStatus,
        pub created_on: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub client_id: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendMessageRequest {
        pub body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub template_id: Option<String>,
    }

    /// Status change pushed or polled for a message that already exists.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusDelta {
        pub id: String,
        pub status: MessageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub error_message: Option<String>,
    }
}

pub mod conversation {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub enum ConversationStatus {
        Active,
        Archived,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Conversation {
        pub id: String,
        pub patient_phone: String,
        pub friendly_name: String,
        pub status: ConversationStatus,
        #[serde(default)]
        pub opted_out: bool,
        #[serde(default)]
        pub last_message_at: Option<String>,
        #[serde(default)]
        pub unread_count: u32,
    }
}

pub mod history {
    use serde::{Deserialize, Serialize};

    use crate::message::Message;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Pagination {
        pub total: u64,
        pub limit: u32,
        pub offset: u64,
        pub has_more: bool,
    }

    /// One page of history, oldest first.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HistoryPage {
        pub data: Vec<Message>,
        pub pagination: Pagination,
    }
}
