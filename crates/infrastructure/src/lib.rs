//! 基础设施层实现。
//!
//! 提供 Postgres 仓储与用户目录适配器，实现应用层定义的端口。

pub mod migrations;
pub mod repository;

pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageRepository, PgUserDirectory};
