//! 主应用程序入口
//!
//! 启动 Axum Web API 服务。

use std::sync::Arc;

use application::presence::memory::InMemoryPresenceRegistry;
use application::{ChatService, ChatServiceDependencies, SystemClock};
use config::AppConfig;
use infrastructure::{create_pg_pool, PgMessageRepository, PgUserDirectory, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    MIGRATOR.run(&pg_pool).await?;

    let message_repository = Arc::new(PgMessageRepository::new(pg_pool.clone()));
    let user_directory = Arc::new(PgUserDirectory::new(pg_pool));
    let presence = InMemoryPresenceRegistry::new();
    let clock = Arc::new(SystemClock);

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        message_repository,
        user_directory: user_directory.clone(),
        presence,
        clock,
    }));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(chat_service, user_directory, jwt_service);

    let app = router(state);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("客服消息服务启动在 http://{bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
