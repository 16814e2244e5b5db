//! 签出/签入/续期 API 处理器

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use validator::Validate;

use crate::{
    dto::{ApiResponse, CheckInRequest, CheckOutRequest, ExtendRequest},
    error::LockError,
    models::Lock,
    state::AppState,
};

/// 签出资源
///
/// POST /api/v1/resources/{id}/checkout
///
/// 返回的锁包含令牌，签入和续期时必须携带。
pub async fn check_out(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    payload: Result<Json<CheckOutRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Lock>>, LockError> {
    let Json(req) = payload?;
    req.validate()?;

    let lock = state
        .lock_manager
        .check_out(
            &resource_id,
            &req.holder,
            req.duration_hint.map(Duration::from_secs),
        )
        .await?;

    Ok(Json(ApiResponse::success(lock)))
}

/// 签入资源
///
/// POST /api/v1/resources/{id}/checkin
pub async fn check_in(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    payload: Result<Json<CheckInRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, LockError> {
    let Json(req) = payload?;
    req.validate()?;

    state.lock_manager.check_in(&resource_id, &req.token).await?;

    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 续期
///
/// POST /api/v1/resources/{id}/extend
pub async fn extend(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    payload: Result<Json<ExtendRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Lock>>, LockError> {
    let Json(req) = payload?;
    req.validate()?;

    let lock = state
        .lock_manager
        .extend(
            &resource_id,
            &req.token,
            Duration::from_secs(req.additional_duration),
        )
        .await?;

    Ok(Json(ApiResponse::success(lock)))
}
