use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error codes carried in the response envelope. Clients dispatch on these
/// rather than on HTTP status codes.
pub mod code {
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    pub const FILE_DELETED: &str = "FILE_DELETED";
    pub const ILLEGAL_FORMAT: &str = "ILLEGAL_FORMAT";
    pub const INVALID_AUTHORIZATION: &str = "INVALID_AUTHORIZATION";
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File is not found")]
    FileNotFound,
    #[error("File has been deleted already")]
    FileDeleted,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Illegal format: {0}")]
    IllegalFormat(String),
    #[error("Invalid authorization")]
    InvalidAuthorization,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The envelope error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::FileNotFound => code::FILE_NOT_FOUND,
            AppError::FileDeleted => code::FILE_DELETED,
            AppError::BadRequest(_) => code::INVALID_REQUEST,
            AppError::IllegalFormat(_) => code::ILLEGAL_FORMAT,
            AppError::InvalidAuthorization => code::INVALID_AUTHORIZATION,
            AppError::Database(_) | AppError::Io(_) | AppError::Internal(_) => code::UNKNOWN_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::FileNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::FileDeleted => (StatusCode::GONE, self.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::IllegalFormat(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidAuthorization => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        let body = Json(json!({
            "error": true,
            "errorCode": self.code(),
            "message": message,
            "data": null,
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
