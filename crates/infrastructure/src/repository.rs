//! Postgres 仓储实现

use application::repository::{
    HistoryScope, MessagePage, MessageRepository, UnreadScope, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Message, MessageContent, MessageId, MessageType, RepositoryError, Timestamp, UserId, UserRole,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn message_type_as_str(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Direct => "direct",
        MessageType::Announcement => "announcement",
        MessageType::Newsletter => "newsletter",
    }
}

fn message_type_from_str(value: &str) -> Result<MessageType, RepositoryError> {
    match value {
        "direct" => Ok(MessageType::Direct),
        "announcement" => Ok(MessageType::Announcement),
        "newsletter" => Ok(MessageType::Newsletter),
        other => Err(invalid_data(format!("未知的消息类型: {other}"))),
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    content: String,
    message_type: String,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    is_read: bool,
    read_at: Option<DateTime<Utc>>,
    attachments: Json<Vec<String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            content,
            message_type: message_type_from_str(&value.message_type)?,
            sender_id: UserId::from(value.sender_id),
            receiver_id: value.receiver_id.map(UserId::from),
            is_read: value.is_read,
            read_at: value.read_at,
            attachments: value.attachments.0,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, content, message_type, sender_id, receiver_id, is_read, \
     read_at, attachments, created_at, updated_at, deleted_at";

/// 历史/删除共用的范围条件。Participant 用一个绑定位，
/// Conversation 用两个，StaffPool 不需要绑定。
fn scope_condition(scope: HistoryScope) -> (&'static str, Vec<Uuid>) {
    match scope {
        HistoryScope::Participant(user) => (
            "(sender_id = $1 OR receiver_id = $1)",
            vec![Uuid::from(user)],
        ),
        HistoryScope::StaffPool => ("TRUE", Vec::new()),
        HistoryScope::Conversation {
            staff_id,
            parent_id,
        } => (
            "((sender_id = $1 AND receiver_id IS NULL) \
              OR (sender_id = $2 AND receiver_id = $1) \
              OR (sender_id = $1 AND receiver_id = $2))",
            vec![Uuid::from(parent_id), Uuid::from(staff_id)],
        ),
    }
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages \
             (id, content, message_type, sender_id, receiver_id, is_read, read_at, \
              attachments, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(Uuid::from(message.id))
        .bind(message.content.as_str())
        .bind(message_type_as_str(message.message_type))
        .bind(Uuid::from(message.sender_id))
        .bind(message.receiver_id.map(Uuid::from))
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(Json(&message.attachments))
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn update(&self, message: &Message) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE messages \
             SET is_read = $2, read_at = $3, updated_at = $4, deleted_at = $5 \
             WHERE id = $1",
        )
        .bind(Uuid::from(message.id))
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn chat_history(
        &self,
        scope: HistoryScope,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let (condition, binds) = scope_condition(scope);
        let offset = (page.saturating_sub(1) as i64) * limit as i64;

        let count_sql =
            format!("SELECT COUNT(*) FROM messages WHERE deleted_at IS NULL AND message_type = 'direct' AND {condition}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(*bind);
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        // LIMIT/OFFSET 的绑定位排在范围绑定位之后
        let page_sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE deleted_at IS NULL AND message_type = 'direct' AND {condition} \
             ORDER BY created_at DESC \
             LIMIT ${} OFFSET ${}",
            binds.len() + 1,
            binds.len() + 2,
        );
        let mut page_query = sqlx::query_as::<_, MessageRecord>(&page_sql);
        for bind in &binds {
            page_query = page_query.bind(*bind);
        }
        let records = page_query
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessagePage {
            messages,
            total: total as u64,
            page,
            limit,
        })
    }

    async fn soft_delete_history(
        &self,
        scope: HistoryScope,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let (condition, binds) = scope_condition(scope);
        let sql = format!(
            "UPDATE messages SET deleted_at = ${ts}, updated_at = ${ts} \
             WHERE deleted_at IS NULL AND message_type = 'direct' AND {condition}",
            ts = binds.len() + 1,
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(*bind);
        }
        let result = query
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn count_unread(&self, scope: UnreadScope) -> Result<u64, RepositoryError> {
        let count: i64 = match scope {
            UnreadScope::Parent(user) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM messages \
                 WHERE deleted_at IS NULL AND message_type = 'direct' \
                   AND is_read = FALSE AND receiver_id = $1",
            )
            .bind(Uuid::from(user))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?,
            UnreadScope::Staff(user) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM messages \
                 WHERE deleted_at IS NULL AND message_type = 'direct' \
                   AND is_read = FALSE AND (receiver_id IS NULL OR receiver_id = $1)",
            )
            .bind(Uuid::from(user))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?,
        };
        Ok(count as u64)
    }

    async fn count_unread_by_parent(&self) -> Result<Vec<(UserId, u64)>, RepositoryError> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT sender_id, COUNT(*) FROM messages \
             WHERE deleted_at IS NULL AND message_type = 'direct' \
               AND is_read = FALSE AND receiver_id IS NULL \
             GROUP BY sender_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(rows
            .into_iter()
            .map(|(sender_id, count)| (UserId::from(sender_id), count as u64))
            .collect())
    }
}

/// 用户目录的 Postgres 实现。用户主数据由门户系统维护，
/// 这里只读取消息模块需要的角色字段。
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn role_of(&self, user_id: UserId) -> Result<Option<UserRole>, RepositoryError> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(Uuid::from(user_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        // 门户侧的特权角色统一归并为 Staff
        match role.as_deref() {
            None => Ok(None),
            Some("parent") => Ok(Some(UserRole::Parent)),
            Some("admin") | Some("therapist") | Some("content_manager") => {
                Ok(Some(UserRole::Staff))
            }
            Some(other) => Err(invalid_data(format!("未知的用户角色: {other}"))),
        }
    }
}

/// 创建 Postgres 连接池。
pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
