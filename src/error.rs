//! Unified application error model and mapping helpers.
//! One enum is shared by the dispatch pipeline, the executors and the HTTP
//! layer so every failure surfaces through the same `{"errors": [...]}` body.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum AppError {
    Validation { code: String, message: String },
    Forbidden { code: String, message: String },
    Render { code: String, message: String },
    Timeout { code: String, message: String },
    NotFound { code: String, message: String },
    Gone { code: String, message: String },
    Conflict { code: String, message: String },
    Backend { code: String, message: String },
    BackendTimeout { code: String, message: String },
    Execution { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Render { code, .. }
            | AppError::Timeout { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Gone { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Backend { code, .. }
            | AppError::BackendTimeout { code, .. }
            | AppError::Execution { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Render { message, .. }
            | AppError::Timeout { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Gone { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Backend { message, .. }
            | AppError::BackendTimeout { message, .. }
            | AppError::Execution { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn render<S: Into<String>>(code: S, msg: S) -> Self { AppError::Render { code: code.into(), message: msg.into() } }
    pub fn timeout<S: Into<String>>(code: S, msg: S) -> Self { AppError::Timeout { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn gone<S: Into<String>>(code: S, msg: S) -> Self { AppError::Gone { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn backend<S: Into<String>>(code: S, msg: S) -> Self { AppError::Backend { code: code.into(), message: msg.into() } }
    pub fn backend_timeout<S: Into<String>>(code: S, msg: S) -> Self { AppError::BackendTimeout { code: code.into(), message: msg.into() } }
    pub fn execution<S: Into<String>>(code: S, msg: S) -> Self { AppError::Execution { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Forbidden { .. } => 403,
            AppError::Render { .. } => 400,
            // Timeouts normally travel inside a failed execution payload;
            // a bare surface maps to a server-side failure.
            AppError::Timeout { .. } => 500,
            AppError::NotFound { .. } => 404,
            AppError::Gone { .. } => 410,
            AppError::Conflict { .. } => 409,
            AppError::Backend { .. } => 500,
            AppError::BackendTimeout { .. } => 500,
            AppError::Execution { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    /// Wire detail for one error, as it appears inside the `errors` array.
    pub fn detail(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(obj) = v.as_object_mut() {
            obj.insert("http_status".into(), serde_json::json!(self.http_status()));
        }
        v
    }

    /// Full error response body: `{"errors": [detail]}`.
    pub fn errors_body(&self) -> serde_json::Value {
        serde_json::json!({ "errors": [self.detail()] })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Execution { code: "execution_failure".into(), message: err.to_string() }
    }
}
