//! 会话服务
//!
//! 实时通道与 REST 共用的用例层：消息收发、已读回执、输入提示、
//! 未读统计、历史查询与删除。实时投递一律尽力而为，失败只记日志；
//! 持久化失败全部向上传播。

use std::sync::Arc;

use domain::{
    delivery_targets, Message, MessageContent, MessageId, RoomAddress, UserId, UserRole,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::dto::{MessageDto, UnreadBySenderDto};
use crate::error::ApplicationError;
use crate::events::ChannelEvent;
use crate::presence::{ChannelHandle, PresenceRegistry};
use crate::repository::{HistoryScope, MessagePage, MessageRepository, UnreadScope, UserDirectory};

/// 发送消息请求。家长发送时忽略 `receiver_id`（固定进入员工池），
/// 员工发送时必填。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub sender_role: UserRole,
    pub content: String,
    pub receiver_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// 服务依赖，全部以端口注入。
pub struct ChatServiceDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChatService {
    message_repository: Arc<dyn MessageRepository>,
    user_directory: Arc<dyn UserDirectory>,
    presence: Arc<dyn PresenceRegistry>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self {
            message_repository: deps.message_repository,
            user_directory: deps.user_directory,
            presence: deps.presence,
            clock: deps.clock,
        }
    }

    /// 登记一条新连接。家长上线时向员工池广播 `user_connected`。
    pub async fn connect(
        &self,
        user_id: UserId,
        role: UserRole,
        channel: ChannelHandle,
    ) -> RoomAddress {
        let room = self.presence.upsert(user_id, role, channel).await;
        info!(user_id = %user_id, role = ?role, "用户已连接");

        if role == UserRole::Parent {
            self.presence
                .deliver_to_staff(ChannelEvent::UserConnected {
                    user_id: user_id.into(),
                    timestamp: self.clock.now(),
                })
                .await;
        }
        room
    }

    /// 注销连接。只有 `connection_id` 仍是当前登记时才生效，
    /// 被新连接替换过的旧连接在这里静默退出。
    pub async fn disconnect(&self, user_id: UserId, connection_id: Uuid) {
        let Some(entry) = self.presence.remove_connection(user_id, connection_id).await else {
            debug!(user_id = %user_id, "断开的连接已被替换，跳过清理");
            return;
        };
        info!(user_id = %user_id, role = ?entry.role, "用户已断开");

        if entry.role == UserRole::Parent {
            self.presence
                .deliver_to_staff(ChannelEvent::UserDisconnected {
                    user_id: user_id.into(),
                    timestamp: self.clock.now(),
                })
                .await;
        }
    }

    /// 发送消息：校验、落库、再按路由规则投递。
    ///
    /// 投递发生在落库之后，接收方不在线只影响实时推送，不影响
    /// 历史与未读统计。
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageDto, ApplicationError> {
        let sender_id = UserId::from(request.sender_id);
        let content = MessageContent::new(&request.content)?;

        // 家长消息固定进入员工池，忽略客户端携带的接收者
        let receiver_id = match request.sender_role {
            UserRole::Parent => None,
            UserRole::Staff => {
                let receiver =
                    UserId::from(request.receiver_id.ok_or(domain::DomainError::ReceiverRequired)?);
                if self.user_directory.role_of(receiver).await?.is_none() {
                    return Err(ApplicationError::not_found("receiver"));
                }
                Some(receiver)
            }
        };

        let now = self.clock.now();
        let message = Message::new_direct(
            MessageId::from(Uuid::new_v4()),
            sender_id,
            receiver_id,
            content,
            request.attachments,
            now,
        );
        self.message_repository.create(&message).await.map_err(|err| {
            error!(error = %err, message_id = %message.id, sender_id = %sender_id, "消息持久化失败");
            err
        })?;

        let connected_staff = self.presence.connected_staff().await;
        let targets = delivery_targets(request.sender_role, receiver_id, &connected_staff)?;

        let dto = MessageDto::from(&message);
        let event = ChannelEvent::NewMessage {
            message: dto.clone(),
            sender_id: request.sender_id,
            sender_role: request.sender_role,
        };
        let mut delivered = 0usize;
        for room in &targets {
            if self.presence.deliver(room, event.clone()).await {
                delivered += 1;
            } else {
                debug!(room = %room, message_id = %message.id, "目标不在线，跳过实时投递");
            }
        }
        info!(
            message_id = %message.id,
            sender_id = %sender_id,
            targets = targets.len(),
            delivered,
            "消息已发送"
        );

        // 员工定向发送后在自己房间收到送达确认
        if request.sender_role == UserRole::Staff {
            let confirmation = ChannelEvent::MessageSent {
                message: dto.clone(),
                status: "delivered".to_string(),
            };
            self.presence
                .deliver(&RoomAddress::from_user(sender_id), confirmation)
                .await;
        }

        Ok(dto)
    }

    /// 标记已读。重复标记是成功的空操作，不重发回执。
    pub async fn mark_read(
        &self,
        message_id: Uuid,
        reader_id: Uuid,
    ) -> Result<(), ApplicationError> {
        let reader = UserId::from(reader_id);
        let mut message = self
            .message_repository
            .find_by_id(MessageId::from(message_id))
            .await?
            .ok_or(ApplicationError::not_found("message"))?;
        if message.is_deleted() {
            return Err(ApplicationError::not_found("message"));
        }

        let changed = match message.mark_read(reader, self.clock.now()) {
            Ok(changed) => changed,
            Err(domain::DomainError::NotMessageReceiver) => {
                return Err(ApplicationError::Unauthorized);
            }
            Err(err) => return Err(err.into()),
        };
        if !changed {
            debug!(message_id = %message.id, reader = %reader, "消息已是已读状态，跳过回执");
            return Ok(());
        }

        self.message_repository.update(&message).await.map_err(|err| {
            error!(error = %err, message_id = %message.id, "已读状态写回失败");
            err
        })?;

        let receipt = ChannelEvent::MessageReadReceipt {
            message_id,
            read_by: reader_id,
            // mark_read 返回 true 时 read_at 必然已写入
            read_at: message.read_at.unwrap_or(message.updated_at),
        };
        let sender_room = RoomAddress::from_user(message.sender_id);
        if !self.presence.deliver(&sender_room, receipt).await {
            debug!(message_id = %message.id, "发送者不在线，已读回执未投递");
        }
        Ok(())
    }

    /// 输入提示。家长的提示广播给员工池；员工的提示需要指明家长，
    /// 缺省时静默丢弃。
    pub async fn typing(
        &self,
        user_id: Uuid,
        role: UserRole,
        receiver_id: Option<Uuid>,
        is_typing: bool,
    ) {
        match role {
            UserRole::Parent => {
                self.presence
                    .deliver_to_staff(ChannelEvent::UserTyping { user_id, is_typing })
                    .await;
            }
            UserRole::Staff => {
                let Some(receiver) = receiver_id else {
                    debug!(staff_id = %user_id, "员工输入提示缺少接收者，忽略");
                    return;
                };
                let event = ChannelEvent::StaffTyping {
                    staff_id: user_id,
                    is_typing,
                };
                self.presence
                    .deliver(&RoomAddress::from_user(UserId::from(receiver)), event)
                    .await;
            }
        }
    }

    /// 当前用户口径下的未读数。
    pub async fn unread_count(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<u64, ApplicationError> {
        let scope = match role {
            UserRole::Parent => UnreadScope::Parent(UserId::from(user_id)),
            UserRole::Staff => UnreadScope::Staff(UserId::from(user_id)),
        };
        Ok(self.message_repository.count_unread(scope).await?)
    }

    /// 员工看板：按家长聚合的未读数。家长调用直接拒绝。
    pub async fn unread_counts_by_parent(
        &self,
        role: UserRole,
    ) -> Result<Vec<UnreadBySenderDto>, ApplicationError> {
        if role != UserRole::Staff {
            return Err(ApplicationError::Unauthorized);
        }
        let counts = self.message_repository.count_unread_by_parent().await?;
        Ok(counts
            .into_iter()
            .map(|(user_id, unread_count)| UnreadBySenderDto {
                user_id: user_id.into(),
                unread_count,
            })
            .collect())
    }

    /// 历史查询。家长只能看自己的会话；员工不带 `counterpart`
    /// 时看员工池全景，带上则看与该家长的双向会话。
    pub async fn chat_history(
        &self,
        user_id: Uuid,
        role: UserRole,
        counterpart: Option<Uuid>,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, ApplicationError> {
        let scope = Self::history_scope(UserId::from(user_id), role, counterpart);
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        Ok(self
            .message_repository
            .chat_history(scope, page, limit)
            .await?)
    }

    /// 删除单条消息。发送者本人或任意员工可删；删除后向会话双方
    /// 推送 `message_deleted`。
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        actor_id: Uuid,
        actor_role: UserRole,
    ) -> Result<(), ApplicationError> {
        let actor = UserId::from(actor_id);
        let mut message = self
            .message_repository
            .find_by_id(MessageId::from(message_id))
            .await?
            .ok_or(ApplicationError::not_found("message"))?;
        if message.is_deleted() {
            return Err(ApplicationError::not_found("message"));
        }
        if message.sender_id != actor && actor_role != UserRole::Staff {
            return Err(ApplicationError::Unauthorized);
        }

        let now = self.clock.now();
        message.mark_deleted(now);
        self.message_repository.update(&message).await.map_err(|err| {
            error!(error = %err, message_id = %message.id, "删除状态写回失败");
            err
        })?;
        info!(message_id = %message.id, actor = %actor, "消息已删除");

        let event = ChannelEvent::MessageDeleted {
            message_id,
            timestamp: now,
        };
        self.presence
            .deliver(&RoomAddress::from_user(message.sender_id), event.clone())
            .await;
        match message.receiver_id {
            Some(receiver) => {
                self.presence
                    .deliver(&RoomAddress::from_user(receiver), event)
                    .await;
            }
            None => {
                // 员工池消息：全体在线员工都看到过，通知他们移除
                self.presence.deliver_to_staff(event).await;
            }
        }
        Ok(())
    }

    /// 清空一段历史（软删除），返回受影响条数。
    pub async fn clear_history(
        &self,
        user_id: Uuid,
        role: UserRole,
        counterpart: Option<Uuid>,
    ) -> Result<u64, ApplicationError> {
        let scope = Self::history_scope(UserId::from(user_id), role, counterpart);
        let affected = self
            .message_repository
            .soft_delete_history(scope, self.clock.now())
            .await
            .map_err(|err| {
                error!(error = %err, user = %user_id, "历史清除写入失败");
                err
            })?;
        warn!(user = %user_id, affected, "历史记录已清空");
        Ok(affected)
    }

    fn history_scope(user_id: UserId, role: UserRole, counterpart: Option<Uuid>) -> HistoryScope {
        match (role, counterpart) {
            (UserRole::Parent, _) => HistoryScope::Participant(user_id),
            (UserRole::Staff, None) => HistoryScope::StaffPool,
            (UserRole::Staff, Some(parent)) => HistoryScope::Conversation {
                staff_id: user_id,
                parent_id: UserId::from(parent),
            },
        }
    }
}
