//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 消息内容为空
    #[error("消息内容不能为空")]
    EmptyContent,

    /// 消息内容超长
    #[error("消息内容超过 {max} 字符上限")]
    ContentTooLong { max: usize },

    /// 员工发送消息必须指定接收者
    #[error("员工发送消息必须指定接收者")]
    ReceiverRequired,

    /// 只有消息接收者才能标记已读
    #[error("只有消息接收者才能标记已读")]
    NotMessageReceiver,

    /// 消息已被删除
    #[error("消息已被删除")]
    MessageDeleted,

    /// 无效的房间地址
    #[error("无效的房间地址: {value}")]
    InvalidRoomAddress { value: String },
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储层错误，由基础设施实现产生、在应用层消化
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("record not found")]
    NotFound,
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
