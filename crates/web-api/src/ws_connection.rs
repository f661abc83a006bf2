//! WebSocket 连接处理
//!
//! 每条连接一个出站通道：服务层通过在线状态注册表向通道写事件，
//! 发送任务把事件序列化后写回 socket。客户端帧在接收任务里解析
//! 并分发给会话服务，应答事件与广播事件走同一条出站通道。

use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserRole;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use application::{ChannelEvent, ChannelHandle, SendMessageRequest};

use crate::state::{AppState, Identity};

/// 客户端上行事件。snake_case 的 `type` 标签 + camelCase 字段，
/// 与既有前端的事件名保持一致。
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ClientEvent {
    SendMessage {
        content: String,
        receiver_id: Option<Uuid>,
        #[serde(default)]
        attachments: Vec<String>,
    },
    AdminSendMessage {
        content: String,
        receiver_id: Uuid,
        #[serde(default)]
        attachments: Vec<String>,
    },
    MessageRead {
        message_id: Uuid,
    },
    TypingStart {
        receiver_id: Option<Uuid>,
    },
    TypingStop {
        receiver_id: Option<Uuid>,
    },
    GetUnreadCount,
    GetAllUnreadCounts,
}

pub struct WsConnection;

impl WsConnection {
    /// 连接主循环。登记在先：在进入收发循环之前完成在线登记，
    /// 避免"已连接但收不到广播"的窗口。
    pub async fn run(socket: WebSocket, state: AppState, identity: Identity) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let connection_id = Uuid::new_v4();
        let handle = ChannelHandle::new(connection_id, out_tx.clone());

        let room = state
            .chat_service
            .connect(identity.user_id, identity.role, handle)
            .await;
        tracing::info!(user_id = %identity.user_id, %room, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        // 发送任务：出站通道 -> socket
        let mut send_task = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let payload = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(error = %err, "下行事件序列化失败");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        // 接收任务：socket -> 会话服务
        let recv_state = state.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Text(text) => {
                        Self::dispatch(&recv_state, identity, text.as_str(), &out_tx).await;
                    }
                    WsMessage::Close(_) => break,
                    // ping/pong 由底层协议栈应答
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        state
            .chat_service
            .disconnect(identity.user_id, connection_id)
            .await;
        tracing::info!(user_id = %identity.user_id, "WebSocket 连接已断开");
    }

    async fn dispatch(
        state: &AppState,
        identity: Identity,
        raw: &str,
        out_tx: &mpsc::UnboundedSender<ChannelEvent>,
    ) {
        let reply = |event: ChannelEvent| {
            let _ = out_tx.send(event);
        };

        let event: ClientEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "无法解析的客户端事件");
                reply(ChannelEvent::Error {
                    error: format!("无法解析的事件: {err}"),
                });
                return;
            }
        };

        match event {
            ClientEvent::SendMessage {
                content,
                receiver_id,
                attachments,
            } => {
                let result = state
                    .chat_service
                    .send_message(SendMessageRequest {
                        sender_id: identity.user_id.into(),
                        sender_role: identity.role,
                        content,
                        receiver_id,
                        attachments,
                    })
                    .await;
                match result {
                    Ok(_) => reply(ChannelEvent::SendAck {
                        success: true,
                        message: "消息已发送".to_string(),
                    }),
                    Err(err) => reply(ChannelEvent::Error {
                        error: err.to_string(),
                    }),
                }
            }
            ClientEvent::AdminSendMessage {
                content,
                receiver_id,
                attachments,
            } => {
                if identity.role != UserRole::Staff {
                    reply(ChannelEvent::Error {
                        error: "仅员工可定向发送".to_string(),
                    });
                    return;
                }
                let result = state
                    .chat_service
                    .send_message(SendMessageRequest {
                        sender_id: identity.user_id.into(),
                        sender_role: identity.role,
                        content,
                        receiver_id: Some(receiver_id),
                        attachments,
                    })
                    .await;
                match result {
                    Ok(_) => reply(ChannelEvent::SendAck {
                        success: true,
                        message: "消息已发送".to_string(),
                    }),
                    Err(err) => reply(ChannelEvent::Error {
                        error: err.to_string(),
                    }),
                }
            }
            ClientEvent::MessageRead { message_id } => {
                match state
                    .chat_service
                    .mark_read(message_id, identity.user_id.into())
                    .await
                {
                    Ok(()) => reply(ChannelEvent::ReadAck { success: true }),
                    Err(err) => {
                        tracing::debug!(error = %err, %message_id, "标记已读失败");
                        reply(ChannelEvent::Error {
                            error: err.to_string(),
                        });
                    }
                }
            }
            ClientEvent::TypingStart { receiver_id } => {
                state
                    .chat_service
                    .typing(identity.user_id.into(), identity.role, receiver_id, true)
                    .await;
            }
            ClientEvent::TypingStop { receiver_id } => {
                state
                    .chat_service
                    .typing(identity.user_id.into(), identity.role, receiver_id, false)
                    .await;
            }
            ClientEvent::GetUnreadCount => {
                match state
                    .chat_service
                    .unread_count(identity.user_id.into(), identity.role)
                    .await
                {
                    Ok(unread_count) => reply(ChannelEvent::UnreadCount {
                        success: true,
                        unread_count,
                    }),
                    Err(err) => reply(ChannelEvent::Error {
                        error: err.to_string(),
                    }),
                }
            }
            ClientEvent::GetAllUnreadCounts => {
                match state.chat_service.unread_counts_by_parent(identity.role).await {
                    Ok(unread_counts) => reply(ChannelEvent::AllUnreadCounts {
                        success: true,
                        unread_counts,
                    }),
                    Err(err) => reply(ChannelEvent::Error {
                        error: err.to_string(),
                    }),
                }
            }
        }
    }
}
