//! 会话服务行为测试

use std::sync::Arc;

use domain::{Message, MessageId, RepositoryError, Timestamp, UserId, UserRole};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::SystemClock;
use crate::events::ChannelEvent;
use crate::presence::memory::InMemoryPresenceRegistry;
use crate::presence::ChannelHandle;
use crate::repository::memory::{InMemoryMessageRepository, StaticUserDirectory};
use crate::repository::{HistoryScope, MessagePage, MessageRepository, UnreadScope};
use crate::services::{ChatService, ChatServiceDependencies, SendMessageRequest};
use crate::ApplicationError;

struct TestBed {
    service: ChatService,
    repository: Arc<InMemoryMessageRepository>,
    directory: Arc<StaticUserDirectory>,
}

impl TestBed {
    fn new() -> Self {
        let repository = InMemoryMessageRepository::new();
        let directory = StaticUserDirectory::new();
        let presence = InMemoryPresenceRegistry::new();
        let service = ChatService::new(ChatServiceDependencies {
            message_repository: repository.clone(),
            user_directory: directory.clone(),
            presence,
            clock: Arc::new(SystemClock),
        });
        Self {
            service,
            repository,
            directory,
        }
    }

    async fn register(&self, role: UserRole) -> UserId {
        let user_id = UserId::from(Uuid::new_v4());
        self.directory.insert(user_id, role).await;
        user_id
    }

    /// 注册并连接一个用户，返回其下行事件接收端与连接 id。
    async fn connect(
        &self,
        user_id: UserId,
        role: UserRole,
    ) -> (mpsc::UnboundedReceiver<ChannelEvent>, Uuid) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        self.service
            .connect(user_id, role, ChannelHandle::new(connection_id, tx))
            .await;
        (rx, connection_id)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn parent_send(sender: UserId, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: sender.into(),
        sender_role: UserRole::Parent,
        content: content.to_string(),
        receiver_id: None,
        attachments: Vec::new(),
    }
}

fn staff_send(sender: UserId, receiver: Option<UserId>, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: sender.into(),
        sender_role: UserRole::Staff,
        content: content.to_string(),
        receiver_id: receiver.map(Into::into),
        attachments: Vec::new(),
    }
}

#[tokio::test]
async fn parent_message_reaches_every_connected_staff() {
    let bed = TestBed::new();
    let parent = bed.register(UserRole::Parent).await;
    let staff_a = bed.register(UserRole::Staff).await;
    let staff_b = bed.register(UserRole::Staff).await;
    let (mut rx_a, _) = bed.connect(staff_a, UserRole::Staff).await;
    let (mut rx_b, _) = bed.connect(staff_b, UserRole::Staff).await;

    let dto = bed
        .service
        .send_message(parent_send(parent, "请问下周的活动安排？"))
        .await
        .unwrap();
    assert_eq!(dto.receiver_id, None);

    for rx in [&mut rx_a, &mut rx_b] {
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ChannelEvent::NewMessage { message, .. } if message.id == dto.id
        )));
    }
}

#[tokio::test]
async fn parent_message_persists_even_with_no_staff_online() {
    let bed = TestBed::new();
    let parent = bed.register(UserRole::Parent).await;

    let dto = bed
        .service
        .send_message(parent_send(parent, "没人在线也要留言"))
        .await
        .unwrap();

    let stored = bed
        .repository
        .find_by_id(dto.id.into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.receiver_id, None);
    assert!(!stored.is_read);
}

#[tokio::test]
async fn staff_message_requires_known_receiver() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;

    let missing = bed
        .service
        .send_message(staff_send(staff, None, "hello"))
        .await;
    assert!(matches!(
        missing,
        Err(ApplicationError::Domain(
            domain::DomainError::ReceiverRequired
        ))
    ));

    let unknown = UserId::from(Uuid::new_v4());
    let not_found = bed
        .service
        .send_message(staff_send(staff, Some(unknown), "hello"))
        .await;
    assert!(matches!(
        not_found,
        Err(ApplicationError::NotFound { resource: "receiver" })
    ));

    // 两次失败都不应留下任何持久化痕迹
    let page = bed
        .repository
        .chat_history(HistoryScope::StaffPool, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn staff_sender_gets_delivery_confirmation() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;
    let (mut staff_rx, _) = bed.connect(staff, UserRole::Staff).await;
    let (mut parent_rx, _) = bed.connect(parent, UserRole::Parent).await;

    let dto = bed
        .service
        .send_message(staff_send(staff, Some(parent), "已收到您的问题"))
        .await
        .unwrap();

    let parent_events = drain(&mut parent_rx);
    assert!(parent_events.iter().any(|e| matches!(
        e,
        ChannelEvent::NewMessage { message, .. } if message.id == dto.id
    )));

    let staff_events = drain(&mut staff_rx);
    assert!(staff_events.iter().any(|e| matches!(
        e,
        ChannelEvent::MessageSent { message, status } if message.id == dto.id && status.as_str() == "delivered"
    )));
}

#[tokio::test]
async fn mark_read_sends_exactly_one_receipt() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;
    let (mut staff_rx, _) = bed.connect(staff, UserRole::Staff).await;

    let dto = bed
        .service
        .send_message(staff_send(staff, Some(parent), "请查收"))
        .await
        .unwrap();
    drain(&mut staff_rx);

    // 重复标记：两次都成功，但回执只发一次
    bed.service.mark_read(dto.id, parent.into()).await.unwrap();
    bed.service.mark_read(dto.id, parent.into()).await.unwrap();

    let receipts: Vec<_> = drain(&mut staff_rx)
        .into_iter()
        .filter(|e| matches!(e, ChannelEvent::MessageReadReceipt { .. }))
        .collect();
    assert_eq!(receipts.len(), 1);
    match &receipts[0] {
        ChannelEvent::MessageReadReceipt {
            message_id,
            read_by,
            ..
        } => {
            assert_eq!(*message_id, dto.id);
            assert_eq!(*read_by, Uuid::from(parent));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn mark_read_by_stranger_is_unauthorized() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;
    let stranger = bed.register(UserRole::Parent).await;

    let dto = bed
        .service
        .send_message(staff_send(staff, Some(parent), "私密内容"))
        .await
        .unwrap();

    let result = bed.service.mark_read(dto.id, stranger.into()).await;
    assert!(matches!(result, Err(ApplicationError::Unauthorized)));

    let missing = bed.service.mark_read(Uuid::new_v4(), parent.into()).await;
    assert!(matches!(missing, Err(ApplicationError::NotFound { .. })));
}

#[tokio::test]
async fn parent_typing_reaches_staff_rooms_only() {
    let bed = TestBed::new();
    let parent = bed.register(UserRole::Parent).await;
    let other_parent = bed.register(UserRole::Parent).await;
    let staff = bed.register(UserRole::Staff).await;
    let (mut staff_rx, _) = bed.connect(staff, UserRole::Staff).await;
    let (mut other_rx, _) = bed.connect(other_parent, UserRole::Parent).await;
    drain(&mut staff_rx);

    bed.service
        .typing(parent.into(), UserRole::Parent, None, true)
        .await;

    let staff_events = drain(&mut staff_rx);
    assert!(staff_events.iter().any(|e| matches!(
        e,
        ChannelEvent::UserTyping { user_id, is_typing: true } if *user_id == Uuid::from(parent)
    )));
    assert!(drain(&mut other_rx)
        .iter()
        .all(|e| !matches!(e, ChannelEvent::UserTyping { .. })));
}

#[tokio::test]
async fn staff_typing_without_receiver_is_dropped() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;
    let (mut parent_rx, _) = bed.connect(parent, UserRole::Parent).await;

    bed.service
        .typing(staff.into(), UserRole::Staff, None, true)
        .await;
    assert!(drain(&mut parent_rx).is_empty());

    bed.service
        .typing(staff.into(), UserRole::Staff, Some(parent.into()), true)
        .await;
    let events = drain(&mut parent_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ChannelEvent::StaffTyping { staff_id, is_typing: true } if *staff_id == Uuid::from(staff)
    )));
}

#[tokio::test]
async fn unread_counts_follow_role_scopes() {
    let bed = TestBed::new();
    let parent_a = bed.register(UserRole::Parent).await;
    let parent_b = bed.register(UserRole::Parent).await;
    let staff = bed.register(UserRole::Staff).await;

    // 两位家长来信进入员工池，员工回一条给 parent_a
    bed.service
        .send_message(parent_send(parent_a, "问题一"))
        .await
        .unwrap();
    bed.service
        .send_message(parent_send(parent_a, "问题二"))
        .await
        .unwrap();
    bed.service
        .send_message(parent_send(parent_b, "问题三"))
        .await
        .unwrap();
    bed.service
        .send_message(staff_send(staff, Some(parent_a), "回复"))
        .await
        .unwrap();

    assert_eq!(
        bed.service
            .unread_count(staff.into(), UserRole::Staff)
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        bed.service
            .unread_count(parent_a.into(), UserRole::Parent)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        bed.service
            .unread_count(parent_b.into(), UserRole::Parent)
            .await
            .unwrap(),
        0
    );

    let mut by_parent = bed
        .service
        .unread_counts_by_parent(UserRole::Staff)
        .await
        .unwrap();
    by_parent.sort_by_key(|entry| entry.unread_count);
    assert_eq!(by_parent.len(), 2);
    assert_eq!(by_parent[0].user_id, Uuid::from(parent_b));
    assert_eq!(by_parent[0].unread_count, 1);
    assert_eq!(by_parent[1].user_id, Uuid::from(parent_a));
    assert_eq!(by_parent[1].unread_count, 2);
}

#[tokio::test]
async fn unread_counts_by_parent_rejects_parents() {
    let bed = TestBed::new();
    let result = bed.service.unread_counts_by_parent(UserRole::Parent).await;
    assert!(matches!(result, Err(ApplicationError::Unauthorized)));
}

#[tokio::test]
async fn parent_presence_is_broadcast_to_staff_only() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;
    let bystander = bed.register(UserRole::Parent).await;
    let (mut staff_rx, _) = bed.connect(staff, UserRole::Staff).await;
    let (mut bystander_rx, _) = bed.connect(bystander, UserRole::Parent).await;

    let (_parent_rx, connection_id) = bed.connect(parent, UserRole::Parent).await;
    bed.service.disconnect(parent, connection_id).await;

    let staff_events = drain(&mut staff_rx);
    assert!(staff_events.iter().any(|e| matches!(
        e,
        ChannelEvent::UserConnected { user_id, .. } if *user_id == Uuid::from(parent)
    )));
    assert!(staff_events.iter().any(|e| matches!(
        e,
        ChannelEvent::UserDisconnected { user_id, .. } if *user_id == Uuid::from(parent)
    )));
    assert!(drain(&mut bystander_rx).is_empty());
}

#[tokio::test]
async fn stale_disconnect_does_not_evict_new_connection() {
    let bed = TestBed::new();
    let staff = bed.register(UserRole::Staff).await;
    let parent = bed.register(UserRole::Parent).await;

    let (_old_rx, old_connection) = bed.connect(parent, UserRole::Parent).await;
    let (mut new_rx, _) = bed.connect(parent, UserRole::Parent).await;

    // 旧连接的收尾晚于重连到达
    bed.service.disconnect(parent, old_connection).await;

    let dto = bed
        .service
        .send_message(staff_send(staff, Some(parent), "还在吗"))
        .await
        .unwrap();
    let events = drain(&mut new_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ChannelEvent::NewMessage { message, .. } if message.id == dto.id
    )));
}

#[tokio::test]
async fn history_scopes_by_role_and_counterpart() {
    let bed = TestBed::new();
    let parent_a = bed.register(UserRole::Parent).await;
    let parent_b = bed.register(UserRole::Parent).await;
    let staff = bed.register(UserRole::Staff).await;

    bed.service
        .send_message(parent_send(parent_a, "a1"))
        .await
        .unwrap();
    bed.service
        .send_message(parent_send(parent_b, "b1"))
        .await
        .unwrap();
    bed.service
        .send_message(staff_send(staff, Some(parent_a), "s1"))
        .await
        .unwrap();

    // 家长只看到自己的会话
    let page = bed
        .service
        .chat_history(parent_a.into(), UserRole::Parent, None, 1, 50)
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    // 员工不带 counterpart 看全景
    let page = bed
        .service
        .chat_history(staff.into(), UserRole::Staff, None, 1, 50)
        .await
        .unwrap();
    assert_eq!(page.total, 3);

    // 员工带 counterpart 看与该家长的双向会话
    let page = bed
        .service
        .chat_history(staff.into(), UserRole::Staff, Some(parent_a.into()), 1, 50)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn delete_message_requires_sender_or_staff() {
    let bed = TestBed::new();
    let parent = bed.register(UserRole::Parent).await;
    let other = bed.register(UserRole::Parent).await;
    let staff = bed.register(UserRole::Staff).await;
    let (mut staff_rx, _) = bed.connect(staff, UserRole::Staff).await;

    let dto = bed
        .service
        .send_message(parent_send(parent, "误发"))
        .await
        .unwrap();
    drain(&mut staff_rx);

    let forbidden = bed
        .service
        .delete_message(dto.id, other.into(), UserRole::Parent)
        .await;
    assert!(matches!(forbidden, Err(ApplicationError::Unauthorized)));

    bed.service
        .delete_message(dto.id, staff.into(), UserRole::Staff)
        .await
        .unwrap();
    assert!(drain(&mut staff_rx).iter().any(|e| matches!(
        e,
        ChannelEvent::MessageDeleted { message_id, .. } if *message_id == dto.id
    )));

    // 再删一次：已删除的消息等同不存在
    let again = bed
        .service
        .delete_message(dto.id, staff.into(), UserRole::Staff)
        .await;
    assert!(matches!(again, Err(ApplicationError::NotFound { .. })));

    // 历史中不再可见
    let page = bed
        .service
        .chat_history(parent.into(), UserRole::Parent, None, 1, 50)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn clear_history_soft_deletes_scope() {
    let bed = TestBed::new();
    let parent = bed.register(UserRole::Parent).await;
    let other = bed.register(UserRole::Parent).await;
    let staff = bed.register(UserRole::Staff).await;

    bed.service
        .send_message(parent_send(parent, "一"))
        .await
        .unwrap();
    bed.service
        .send_message(parent_send(parent, "二"))
        .await
        .unwrap();
    bed.service
        .send_message(parent_send(other, "别人的"))
        .await
        .unwrap();

    let affected = bed
        .service
        .clear_history(parent.into(), UserRole::Parent, None)
        .await
        .unwrap();
    assert_eq!(affected, 2);

    assert_eq!(
        bed.service
            .unread_count(staff.into(), UserRole::Staff)
            .await
            .unwrap(),
        1
    );
}

/// 所有操作都返回存储错误的仓储替身。
struct FailingMessageRepository;

fn pool_exhausted() -> RepositoryError {
    RepositoryError::storage("连接池已耗尽")
}

#[async_trait::async_trait]
impl MessageRepository for FailingMessageRepository {
    async fn create(&self, _message: &Message) -> Result<(), RepositoryError> {
        Err(pool_exhausted())
    }

    async fn find_by_id(&self, _id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Err(pool_exhausted())
    }

    async fn update(&self, _message: &Message) -> Result<(), RepositoryError> {
        Err(pool_exhausted())
    }

    async fn chat_history(
        &self,
        _scope: HistoryScope,
        _page: u32,
        _limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        Err(pool_exhausted())
    }

    async fn soft_delete_history(
        &self,
        _scope: HistoryScope,
        _now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        Err(pool_exhausted())
    }

    async fn count_unread(&self, _scope: UnreadScope) -> Result<u64, RepositoryError> {
        Err(pool_exhausted())
    }

    async fn count_unread_by_parent(&self) -> Result<Vec<(UserId, u64)>, RepositoryError> {
        Err(pool_exhausted())
    }
}

#[tokio::test]
async fn storage_failure_surfaces_as_repository_error() {
    let directory = StaticUserDirectory::new();
    let service = ChatService::new(ChatServiceDependencies {
        message_repository: Arc::new(FailingMessageRepository),
        user_directory: directory.clone(),
        presence: InMemoryPresenceRegistry::new(),
        clock: Arc::new(SystemClock),
    });
    let parent = UserId::from(Uuid::new_v4());
    directory.insert(parent, UserRole::Parent).await;

    let sent = service
        .send_message(parent_send(parent, "写入失败的留言"))
        .await;
    assert!(matches!(
        sent,
        Err(ApplicationError::Repository(RepositoryError::Storage { .. }))
    ));

    let read = service.mark_read(Uuid::new_v4(), parent.into()).await;
    assert!(matches!(
        read,
        Err(ApplicationError::Repository(RepositoryError::Storage { .. }))
    ));

    let cleared = service
        .clear_history(parent.into(), UserRole::Parent, None)
        .await;
    assert!(matches!(
        cleared,
        Err(ApplicationError::Repository(RepositoryError::Storage { .. }))
    ));
}
