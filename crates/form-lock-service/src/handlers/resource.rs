//! 资源管理 API 处理器

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use validator::Validate;

use crate::{
    dto::{ApiResponse, RegisterResourceRequest},
    error::LockError,
    models::{LockState, Resource, ResourceStatus},
    state::AppState,
};

/// 注册资源
///
/// POST /api/v1/resources
pub async fn register_resource(
    State(state): State<AppState>,
    payload: Result<Json<RegisterResourceRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Resource>>, LockError> {
    let Json(req) = payload?;
    req.validate()?;

    let resource = state
        .lock_manager
        .register_resource(&req.resource_id, req.name.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(resource)))
}

/// 获取资源列表（含锁状态）
///
/// GET /api/v1/resources
pub async fn list_resources(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ResourceStatus>>>, LockError> {
    let resources = state.lock_manager.list().await?;
    Ok(Json(ApiResponse::success(resources)))
}

/// 查询资源锁状态
///
/// GET /api/v1/resources/{id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Result<Json<ApiResponse<LockState>>, LockError> {
    let lock_state = state.lock_manager.status(&resource_id).await?;
    Ok(Json(ApiResponse::success(lock_state)))
}
