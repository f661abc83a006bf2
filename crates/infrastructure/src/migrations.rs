//! 内嵌数据库迁移

/// 编译期打包 `migrations/` 目录，启动时由 main 执行。
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
