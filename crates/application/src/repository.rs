//! 持久化端口
//!
//! 消息存取与用户目录的抽象，Postgres 实现位于 infrastructure。
//! `memory` 模块提供进程内实现，供服务层测试与接口层集成测试使用。

use async_trait::async_trait;
use domain::{Message, MessageId, MessageType, RepositoryError, Timestamp, UserId, UserRole};

/// 历史查询的可见范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope {
    /// 该用户参与的全部消息（家长视角：自己发出的 + 定向发给自己的）。
    Participant(UserId),
    /// 员工池全景：所有家长来信加上全部员工定向回复。
    StaffPool,
    /// 员工与指定家长之间的双向会话。
    Conversation { staff_id: UserId, parent_id: UserId },
}

/// 未读统计的口径。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadScope {
    /// 家长的未读：定向发给该家长且未读的消息。
    Parent(UserId),
    /// 员工的未读：发往员工池的消息加上定向发给该员工的消息。
    Staff(UserId),
}

/// 一页历史记录，按创建时间倒序。
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError>;

    /// 按 id 查找，软删除的消息同样返回，由调用方判定可见性。
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn update(&self, message: &Message) -> Result<(), RepositoryError>;

    async fn chat_history(
        &self,
        scope: HistoryScope,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError>;

    /// 软删除范围内的全部消息，返回受影响条数。
    async fn soft_delete_history(
        &self,
        scope: HistoryScope,
        now: Timestamp,
    ) -> Result<u64, RepositoryError>;

    async fn count_unread(&self, scope: UnreadScope) -> Result<u64, RepositoryError>;

    /// 员工看板：按家长分组的未读家长来信数。
    async fn count_unread_by_parent(&self) -> Result<Vec<(UserId, u64)>, RepositoryError>;
}

/// 用户目录端口，身份数据由外部系统维护，这里只读角色。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn role_of(&self, user_id: UserId) -> Result<Option<UserRole>, RepositoryError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::*;

    /// 进程内消息存储。
    #[derive(Default)]
    pub struct InMemoryMessageRepository {
        messages: RwLock<Vec<Message>>,
    }

    impl InMemoryMessageRepository {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn in_scope(message: &Message, scope: HistoryScope) -> bool {
            if message.message_type != MessageType::Direct {
                return false;
            }
            match scope {
                HistoryScope::Participant(user_id) => {
                    message.sender_id == user_id || message.receiver_id == Some(user_id)
                }
                HistoryScope::StaffPool => true,
                HistoryScope::Conversation {
                    staff_id,
                    parent_id,
                } => {
                    (message.sender_id == parent_id && message.receiver_id.is_none())
                        || (message.sender_id == staff_id
                            && message.receiver_id == Some(parent_id))
                        || (message.sender_id == parent_id
                            && message.receiver_id == Some(staff_id))
                }
            }
        }

        fn unread_in_scope(message: &Message, scope: UnreadScope) -> bool {
            if message.is_read || message.is_deleted() || message.message_type != MessageType::Direct
            {
                return false;
            }
            match scope {
                UnreadScope::Parent(user_id) => message.receiver_id == Some(user_id),
                UnreadScope::Staff(user_id) => {
                    message.receiver_id.is_none() || message.receiver_id == Some(user_id)
                }
            }
        }
    }

    #[async_trait]
    impl MessageRepository for InMemoryMessageRepository {
        async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
            self.messages.write().await.push(message.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            Ok(self
                .messages
                .read()
                .await
                .iter()
                .find(|m| m.id == id)
                .cloned())
        }

        async fn update(&self, message: &Message) -> Result<(), RepositoryError> {
            let mut messages = self.messages.write().await;
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(slot) => {
                    *slot = message.clone();
                    Ok(())
                }
                None => Err(RepositoryError::NotFound),
            }
        }

        async fn chat_history(
            &self,
            scope: HistoryScope,
            page: u32,
            limit: u32,
        ) -> Result<MessagePage, RepositoryError> {
            let messages = self.messages.read().await;
            let mut matched: Vec<Message> = messages
                .iter()
                .filter(|m| !m.is_deleted() && Self::in_scope(m, scope))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let total = matched.len() as u64;
            let offset = (page.saturating_sub(1) as usize) * limit as usize;
            let messages = matched
                .into_iter()
                .skip(offset)
                .take(limit as usize)
                .collect();
            Ok(MessagePage {
                messages,
                total,
                page,
                limit,
            })
        }

        async fn soft_delete_history(
            &self,
            scope: HistoryScope,
            now: Timestamp,
        ) -> Result<u64, RepositoryError> {
            let mut messages = self.messages.write().await;
            let mut affected = 0;
            for message in messages.iter_mut() {
                if !message.is_deleted() && Self::in_scope(message, scope) {
                    message.mark_deleted(now);
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn count_unread(&self, scope: UnreadScope) -> Result<u64, RepositoryError> {
            Ok(self
                .messages
                .read()
                .await
                .iter()
                .filter(|m| Self::unread_in_scope(m, scope))
                .count() as u64)
        }

        async fn count_unread_by_parent(&self) -> Result<Vec<(UserId, u64)>, RepositoryError> {
            let messages = self.messages.read().await;
            let mut counts: HashMap<UserId, u64> = HashMap::new();
            for message in messages
                .iter()
                .filter(|m| {
                    m.message_type == MessageType::Direct
                        && !m.is_read
                        && !m.is_deleted()
                        && m.receiver_id.is_none()
                })
            {
                *counts.entry(message.sender_id).or_insert(0) += 1;
            }
            Ok(counts.into_iter().collect())
        }
    }

    /// 固定角色表的用户目录。
    #[derive(Default)]
    pub struct StaticUserDirectory {
        roles: RwLock<HashMap<UserId, UserRole>>,
    }

    impl StaticUserDirectory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub async fn insert(&self, user_id: UserId, role: UserRole) {
            self.roles.write().await.insert(user_id, role);
        }
    }

    #[async_trait]
    impl UserDirectory for StaticUserDirectory {
        async fn role_of(&self, user_id: UserId) -> Result<Option<UserRole>, RepositoryError> {
            Ok(self.roles.read().await.get(&user_id).copied())
        }
    }
}
