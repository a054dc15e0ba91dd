//! Wire-level error mapping (§6.4), following
//! `romilpunetha-tao/src/error.rs`'s `AppError` convention: one variant per
//! error kind, a hand-rolled `Display`, and `IntoResponse` mapping each
//! kind to its HTTP status and `{error, status}` JSON body.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use inbetweenies::InbetweeniesError;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    UnsupportedProtocol(String),
    Unauthorized(String),
    BatchTooLarge { received: usize, max: usize },
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnsupportedProtocol(got) => write!(f, "unsupported protocol version: {got}"),
            AppError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            AppError::BatchTooLarge { received, max } => {
                write!(f, "batch of {received} changes exceeds the cap of {max}")
            }
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_kind, detail) = match &self {
            AppError::UnsupportedProtocol(got) => {
                (StatusCode::BAD_REQUEST, "UnsupportedProtocol", got.clone())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized", msg.clone()),
            AppError::BatchTooLarge { received, max } => (
                StatusCode::BAD_REQUEST,
                "BatchTooLarge",
                format!("received {received}, max {max}"),
            ),
            AppError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error_kind": error_kind,
            "detail": detail,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<InbetweeniesError> for AppError {
    fn from(err: InbetweeniesError) -> Self {
        match err {
            InbetweeniesError::UnsupportedProtocol(got) => AppError::UnsupportedProtocol(got),
            InbetweeniesError::Unauthorized(msg) => AppError::Unauthorized(msg),
            InbetweeniesError::BatchTooLarge { received, max } => AppError::BatchTooLarge { received, max },
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
