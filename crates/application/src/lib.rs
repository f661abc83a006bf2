//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理输入校验、持久化边界、
//! 以及对外部适配器（用户目录、在线状态注册表、时钟）的抽象。

pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod presence;
pub mod repository;
pub mod services;

pub use clock::{Clock, SystemClock};
pub use dto::{MessageDto, UnreadBySenderDto};
pub use error::ApplicationError;
pub use events::ChannelEvent;
pub use presence::{ChannelHandle, PresenceEntry, PresenceRegistry};
pub use repository::{
    HistoryScope, MessagePage, MessageRepository, UnreadScope, UserDirectory,
};
pub use services::{ChatService, ChatServiceDependencies, SendMessageRequest};
