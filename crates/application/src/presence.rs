//! 在线状态登记
//!
//! 每个用户至多保留一条活跃连接；新连接到达时替换旧连接。
//! 投递以用户房间为单位，注册表只负责把事件写进对应连接的
//! 出站通道，不关心事件语义。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{RoomAddress, UserId, UserRole};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::ChannelEvent;

/// 单条连接的出站句柄。
///
/// `connection_id` 用于区分同一用户的先后两条连接，断开清理时
/// 只允许携带相同 id 的调用方移除登记，避免旧连接的收尾逻辑把
/// 新连接踢下线。
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub connection_id: Uuid,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelHandle {
    pub fn new(connection_id: Uuid, sender: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    /// 写入出站通道，连接已关闭时返回 false。
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// 一条在线登记。
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub role: UserRole,
    pub channel: ChannelHandle,
}

/// 在线状态注册表端口。
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 登记连接并返回其房间地址，覆盖同一用户的旧连接。
    async fn upsert(&self, user_id: UserId, role: UserRole, channel: ChannelHandle)
        -> RoomAddress;

    /// 按连接 id 移除登记；id 不匹配（已被新连接替换）时不动。
    async fn remove_connection(&self, user_id: UserId, connection_id: Uuid)
        -> Option<PresenceEntry>;

    async fn lookup(&self, user_id: UserId) -> Option<PresenceEntry>;

    /// 当前在线的全部员工。
    async fn connected_staff(&self) -> Vec<UserId>;

    /// 向单个房间投递，目标不在线或通道已关闭时返回 false。
    async fn deliver(&self, room: &RoomAddress, event: ChannelEvent) -> bool;

    /// 向全部在线员工投递，返回成功写入的连接数。
    async fn deliver_to_staff(&self, event: ChannelEvent) -> usize;
}

pub mod memory {
    //! 进程内实现，生产与测试共用。

    use tokio::sync::RwLock;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryPresenceRegistry {
        entries: RwLock<HashMap<UserId, PresenceEntry>>,
    }

    impl InMemoryPresenceRegistry {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl PresenceRegistry for InMemoryPresenceRegistry {
        async fn upsert(
            &self,
            user_id: UserId,
            role: UserRole,
            channel: ChannelHandle,
        ) -> RoomAddress {
            let mut entries = self.entries.write().await;
            entries.insert(
                user_id,
                PresenceEntry {
                    user_id,
                    role,
                    channel,
                },
            );
            RoomAddress::from_user(user_id)
        }

        async fn remove_connection(
            &self,
            user_id: UserId,
            connection_id: Uuid,
        ) -> Option<PresenceEntry> {
            let mut entries = self.entries.write().await;
            match entries.get(&user_id) {
                Some(entry) if entry.channel.connection_id == connection_id => {
                    entries.remove(&user_id)
                }
                _ => None,
            }
        }

        async fn lookup(&self, user_id: UserId) -> Option<PresenceEntry> {
            self.entries.read().await.get(&user_id).cloned()
        }

        async fn connected_staff(&self) -> Vec<UserId> {
            self.entries
                .read()
                .await
                .values()
                .filter(|entry| entry.role.is_staff())
                .map(|entry| entry.user_id)
                .collect()
        }

        async fn deliver(&self, room: &RoomAddress, event: ChannelEvent) -> bool {
            let entries = self.entries.read().await;
            match entries.get(&room.user_id()) {
                Some(entry) => entry.channel.send(event),
                None => false,
            }
        }

        async fn deliver_to_staff(&self, event: ChannelEvent) -> usize {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| entry.role.is_staff())
                .filter(|entry| entry.channel.send(event.clone()))
                .count()
        }
    }
}
