use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use shared::ErrorBody;
use thiserror::Error;

use crate::routes::Reply;

/// Failures talking to the record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store answered with a non-success status (rate limits included,
    /// once retries are exhausted)
    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        payload: Value,
    },

    #[error("record store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid record store url: {0}")]
    InvalidUrl(String),

    #[error("unexpected record store response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Build an upstream error, pulling a readable message out of the payload
    pub fn upstream(status: u16, payload: Value) -> Self {
        let message = payload
            .get("error")
            .and_then(|error| match error {
                Value::Object(inner) => inner.get("message").and_then(Value::as_str),
                Value::String(code) => Some(code.as_str()),
                _ => None,
            })
            .or_else(|| payload.get("message").and_then(Value::as_str))
            .unwrap_or("record store request failed")
            .to_string();

        StoreError::Upstream {
            status,
            message,
            payload,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid JSON payload")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(err) => err
                .status()
                .and_then(|status| StatusCode::from_u16(status).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_reply(self) -> Reply {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }

        let mut body = ErrorBody::new(self.to_string());
        if let AppError::Store(StoreError::Upstream { payload, .. }) = self {
            body = body.with_details(payload);
        }
        Reply::new(status, body)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_reply().into_response()
    }
}
