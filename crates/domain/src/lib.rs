//! 客服消息系统核心领域模型
//!
//! 包含消息实体、用户角色、房间寻址等核心类型，以及纯函数形式的投递路由规则。

pub mod errors;
pub mod message;
pub mod routing;
pub mod user;
pub mod value_objects;

pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, MessageType};
pub use routing::delivery_targets;
pub use user::UserRole;
pub use value_objects::{MessageContent, MessageId, RoomAddress, Timestamp, UserId};
