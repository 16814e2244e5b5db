//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router, middleware,
    routing::{get, post},
};
use locker_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 构建 `/api/v1` 下的业务路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // 资源管理
        .route(
            "/resources",
            get(handlers::resource::list_resources).post(handlers::resource::register_resource),
        )
        .route(
            "/resources/{id}/status",
            get(handlers::resource::get_status),
        )
        // 锁操作
        .route("/resources/{id}/checkout", post(handlers::lock::check_out))
        .route("/resources/{id}/checkin", post(handlers::lock::check_in))
        .route("/resources/{id}/extend", post(handlers::lock::extend))
        // 事件推送
        .route("/events", get(handlers::events::stream_events))
}

/// 构建完整应用路由（含健康检查和可观测性中间件）
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
