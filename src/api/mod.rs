use axum::Json;
use serde::Serialize;

pub mod backup;
pub mod files;
pub mod maintenance;

/// Success envelope; the error half lives in `error.rs`. Every JSON endpoint
/// answers with this shape so clients dispatch on `error`/`errorCode` rather
/// than HTTP status alone.
#[derive(Debug, Serialize)]
pub struct Resp<T: Serialize> {
    pub error: bool,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    pub message: String,
    pub data: Option<T>,
}

/// Wraps a payload in the success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Resp<T>> {
    Json(Resp {
        error: false,
        error_code: String::new(),
        message: String::new(),
        data: Some(data),
    })
}

/// Success with no payload.
pub fn ok_empty() -> Json<Resp<()>> {
    Json(Resp {
        error: false,
        error_code: String::new(),
        message: String::new(),
        data: None,
    })
}
