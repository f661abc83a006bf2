//! 投递路由规则
//!
//! 纯函数：根据发送者角色、显式接收者和当前在线员工快照，计算一条
//! 外发消息的投递目标房间集合。不做任何 I/O。

use crate::errors::{DomainError, DomainResult};
use crate::user::UserRole;
use crate::value_objects::{RoomAddress, UserId};

/// 计算投递目标。
///
/// - 员工指定了接收者：目标是该接收者的单一房间。
/// - 员工未指定接收者：错误，员工发起的消息必须有明确收件人。
/// - 家长：目标是当前所有在线员工的房间（可能为空集——消息仍然持久化，
///   只是没有实时投递）。家长侧传入的显式接收者不参与路由。
pub fn delivery_targets(
    sender_role: UserRole,
    explicit_receiver: Option<UserId>,
    connected_staff: &[UserId],
) -> DomainResult<Vec<RoomAddress>> {
    match sender_role {
        UserRole::Staff => match explicit_receiver {
            Some(receiver) => Ok(vec![RoomAddress::from_user(receiver)]),
            None => Err(DomainError::ReceiverRequired),
        },
        UserRole::Parent => Ok(connected_staff
            .iter()
            .copied()
            .map(RoomAddress::from_user)
            .collect()),
    }
}
