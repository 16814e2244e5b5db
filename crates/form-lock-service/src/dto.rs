//! 请求/响应 DTO 定义
//!
//! 所有请求体和响应体均使用 camelCase 字段名。

use serde::{Deserialize, Serialize};
use validator::Validate;

/// API 统一响应
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（无数据）
    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }
}

/// 注册资源请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResourceRequest {
    #[validate(length(min = 1, max = 128, message = "资源 ID 长度必须在 1-128 个字符之间"))]
    pub resource_id: String,
    #[validate(length(max = 256, message = "资源名称不能超过 256 个字符"))]
    pub name: Option<String>,
}

/// 签出请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutRequest {
    #[validate(length(min = 1, max = 64, message = "持有者长度必须在 1-64 个字符之间"))]
    pub holder: String,
    /// 期望的锁定时长（秒），缺省使用默认时长，超出上限会被截断
    #[validate(range(min = 1, message = "durationHint 必须为正数"))]
    pub duration_hint: Option<u64>,
}

/// 签入请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    #[validate(length(min = 1, message = "token 不能为空"))]
    pub token: String,
}

/// 续期请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    #[validate(length(min = 1, message = "token 不能为空"))]
    pub token: String,
    /// 追加时长（秒）
    #[validate(range(min = 1, message = "additionalDuration 必须为正数"))]
    pub additional_duration: u64,
}
