use std::sync::Arc;

use application::{ChatService, UserDirectory};
use axum::http::HeaderMap;
use domain::{UserId, UserRole};

use crate::auth::JwtService;
use crate::error::ApiError;

/// 一次通过认证的请求身份。
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: UserId,
    pub role: UserRole,
}

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        user_directory: Arc<dyn UserDirectory>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            chat_service,
            user_directory,
            jwt_service,
        }
    }

    /// token 校验 + 目录角色解析。角色以目录为准，token 只携带身份。
    pub async fn authenticate_token(&self, token: &str) -> Result<Identity, ApiError> {
        let claims = self.jwt_service.verify_token(token)?;
        let user_id = UserId::from(claims.user_id);
        let role = self
            .user_directory
            .role_of(user_id)
            .await
            .map_err(|err| ApiError::internal_server_error(err.to_string()))?
            .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
        Ok(Identity { user_id, role })
    }

    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let user_id = self.jwt_service.extract_user_from_headers(headers)?;
        let role = self
            .user_directory
            .role_of(UserId::from(user_id))
            .await
            .map_err(|err| ApiError::internal_server_error(err.to_string()))?
            .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
        Ok(Identity {
            user_id: UserId::from(user_id),
            role,
        })
    }
}
