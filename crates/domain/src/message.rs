//! 消息实体定义
//!
//! 消息一经创建只允许两类变更：已读状态流转（仅接收者）和软删除。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageContent, MessageId, Timestamp, UserId};

/// 消息类型。实时通道上只流转 `Direct`；
/// 公告和简报属于更大的消息模型，仅在持久层出现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Direct,
    Announcement,
    Newsletter,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Direct
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub sender_id: UserId,
    /// `None` 表示广播给员工池（家长未指定接收者时的寻址方式）。
    pub receiver_id: Option<UserId>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub attachments: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing)] // 删除标记不暴露给客户端
    pub deleted_at: Option<Timestamp>,
}

impl Message {
    /// 创建一条实时通道上的直接消息。
    pub fn new_direct(
        id: MessageId,
        sender_id: UserId,
        receiver_id: Option<UserId>,
        content: MessageContent,
        attachments: Vec<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            content,
            message_type: MessageType::Direct,
            sender_id,
            receiver_id,
            is_read: false,
            read_at: None,
            attachments,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// 标记已读。只有接收者本人可以触发 false→true 流转。
    ///
    /// 返回 `true` 表示状态发生了变化；消息已读时重复调用是成功的
    /// 空操作（不刷新 `read_at`），由调用方决定是否跳过已读回执。
    pub fn mark_read(&mut self, reader: UserId, now: Timestamp) -> DomainResult<bool> {
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        if self.receiver_id != Some(reader) {
            return Err(DomainError::NotMessageReceiver);
        }
        if self.is_read {
            return Ok(false);
        }
        self.is_read = true;
        self.read_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// 软删除。不存在物理删除路径。
    pub fn mark_deleted(&mut self, now: Timestamp) {
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}
