use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use domain::DomainError;

        match error {
            ApplicationError::Domain(domain_err) => match domain_err {
                DomainError::EmptyContent
                | DomainError::ContentTooLong { .. }
                | DomainError::ReceiverRequired
                | DomainError::InvalidRoomAddress { .. } => {
                    ApiError::bad_request(domain_err.to_string())
                }
                DomainError::NotMessageReceiver => {
                    ApiError::forbidden("actor is not the message receiver")
                }
                DomainError::MessageDeleted => ApiError::not_found("message not found"),
            },
            ApplicationError::Repository(repo_err) => match repo_err {
                domain::RepositoryError::NotFound => {
                    ApiError::not_found("requested resource not found")
                }
                domain::RepositoryError::Storage { message } => ApiError::internal_server_error(
                    format!("database error: {message}"),
                ),
            },
            ApplicationError::Unauthorized => {
                ApiError::forbidden("operation not allowed for this user")
            }
            ApplicationError::NotFound { resource } => {
                ApiError::not_found(format!("{resource} not found"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
