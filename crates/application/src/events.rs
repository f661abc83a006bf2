//! 下行频道事件
//!
//! 服务端推送给已连接客户端的全部事件。确认类事件（`*_ack`、
//! `unread_count` 等）与广播类事件共用同一条出站通道，按 `type`
//! 字段区分。

use domain::{Timestamp, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dto::{MessageDto, UnreadBySenderDto};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChannelEvent {
    /// 新消息送达接收方。
    NewMessage {
        message: MessageDto,
        sender_id: Uuid,
        sender_role: UserRole,
    },
    /// 员工定向发送后的送达回执。
    MessageSent { message: MessageDto, status: String },
    /// 已读回执，推送给原发送者。
    MessageReadReceipt {
        message_id: Uuid,
        read_by: Uuid,
        read_at: Timestamp,
    },
    /// 家长正在输入，推送给员工池。
    UserTyping { user_id: Uuid, is_typing: bool },
    /// 员工正在输入，推送给对话中的家长。
    StaffTyping { staff_id: Uuid, is_typing: bool },
    /// 家长上线，广播给员工池。
    UserConnected { user_id: Uuid, timestamp: Timestamp },
    /// 家长离线，广播给员工池。
    UserDisconnected { user_id: Uuid, timestamp: Timestamp },
    /// 消息被删除，推送给会话双方。
    MessageDeleted { message_id: Uuid, timestamp: Timestamp },
    /// 发送请求的应答。
    SendAck { success: bool, message: String },
    /// 标记已读请求的应答。
    ReadAck { success: bool },
    /// 当前会话未读数应答。
    UnreadCount { success: bool, unread_count: u64 },
    /// 员工端按家长聚合的未读数应答。
    AllUnreadCounts {
        success: bool,
        unread_counts: Vec<UnreadBySenderDto>,
    },
    /// 请求处理失败。
    Error { error: String },
}
