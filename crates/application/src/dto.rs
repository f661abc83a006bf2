//! 对外传输对象
//!
//! 字段命名沿用既有客户端的 camelCase 线上格式。

use domain::{Message, MessageType, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub attachments: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.into(),
            content: message.content.as_str().to_string(),
            message_type: message.message_type,
            sender_id: message.sender_id.into(),
            receiver_id: message.receiver_id.map(Into::into),
            is_read: message.is_read,
            read_at: message.read_at,
            attachments: message.attachments.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// 员工看板用的按家长聚合的未读数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadBySenderDto {
    pub user_id: Uuid,
    pub unread_count: u64,
}
