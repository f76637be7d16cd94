use std::{any::Any, time::Duration};

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    thiserror::Error,
    tracing::error,
};

/// Failures talking to the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to hash password: {0}")]
    PasswordHash(String),
}

/// Unrecoverable startup faults.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Client-visible request failures. Every variant renders as
/// `{"message": ...}` JSON.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database not ready")]
    StoreNotReady,

    #[error("Not allowed by CORS")]
    OriginDenied,

    #[error("Internal server error")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::StoreNotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::OriginDenied => StatusCode::FORBIDDEN,
            ApiError::Store(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Store(ref e) = self {
            error!(error = %e, "store failure while handling request");
        }
        let status = self.status();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
