//! 表单锁服务错误类型定义
//!
//! 所有锁操作的错误都直接返回给调用方，不在服务内部重试：
//! 除存储故障外，每一种错误都对应调用方可以自行纠正的前置条件。

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 表单锁错误类型
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("资源不存在: {0}")]
    NotFound(String),
    #[error("资源已被 {holder} 锁定: {resource_id}")]
    AlreadyLocked { resource_id: String, holder: String },
    #[error("资源未被锁定: {0}")]
    NotLocked(String),
    #[error("锁令牌不匹配: {0}")]
    TokenMismatch(String),
    #[error("续期超出最长锁定时长: {0}")]
    ExpiryTooFar(String),
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    // 系统错误
    #[error("存储错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl LockError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::NotLocked(_) => StatusCode::NOT_FOUND,
            Self::AlreadyLocked { .. } => StatusCode::CONFLICT,
            Self::TokenMismatch(_) => StatusCode::FORBIDDEN,
            Self::ExpiryTooFar(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            // 存储不可用属于瞬时故障，503 提示调用方退避重试
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyLocked { .. } => "ALREADY_LOCKED",
            Self::NotLocked(_) => "NOT_LOCKED",
            Self::TokenMismatch(_) => "TOKEN_MISMATCH",
            Self::ExpiryTooFar(_) => "EXPIRY_TOO_FAR",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Database(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误（仅存储故障）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl IntoResponse for LockError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "存储操作失败");
                "存储暂不可用，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for LockError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidArgument(errors.to_string())
    }
}

/// 请求体无法解析（非 JSON、字段缺失或类型不符）时按参数错误返回
impl From<JsonRejection> for LockError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}

/// 从共享基础设施错误转换
impl From<locker_shared::error::SharedError> for LockError {
    fn from(err: locker_shared::error::SharedError) -> Self {
        match err {
            locker_shared::error::SharedError::Database(e) => Self::Database(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, LockError>;
