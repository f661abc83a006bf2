use std::sync::Arc;
use std::time::Duration;

use application::presence::memory::InMemoryPresenceRegistry;
use application::repository::memory::{InMemoryMessageRepository, StaticUserDirectory};
use application::{ChatService, ChatServiceDependencies, SystemClock};
use domain::{UserId, UserRole};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::net::TcpListener;
use tokio::time::sleep;
use uuid::Uuid;
use web_api::{router, AppState, Claims, JwtConfig, JwtService};

const TEST_SECRET: &str = "test-secret-at-least-32-bytes-long!";

/// 跑在随机端口上的完整服务，持久层与在线状态走进程内实现。
pub struct TestServer {
    pub base_http: String,
    pub base_ws: String,
    directory: Arc<StaticUserDirectory>,
}

impl TestServer {
    /// 注册一个用户并签发 token。签发属于门户侧，测试里直接编码。
    pub async fn register(&self, role: UserRole) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        self.directory.insert(UserId::from(user_id), role).await;
        (user_id, mint_token(user_id))
    }
}

fn mint_token(user_id: Uuid) -> String {
    let claims = Claims {
        user_id,
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_ref()),
    )
    .expect("token")
}

pub async fn spawn_server() -> TestServer {
    let repository = InMemoryMessageRepository::new();
    let directory = StaticUserDirectory::new();
    let presence = InMemoryPresenceRegistry::new();

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        message_repository: repository,
        user_directory: directory.clone(),
        presence,
        clock: Arc::new(SystemClock),
    }));

    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(chat_service, directory.clone(), jwt);
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    // 等待服务就绪
    sleep(Duration::from_millis(100)).await;

    TestServer {
        base_http: format!("http://{addr}"),
        base_ws: format!("ws://{addr}"),
        directory,
    }
}
