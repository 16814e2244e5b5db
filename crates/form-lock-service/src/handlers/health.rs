//! 健康检查处理器

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::state::AppState;

const SERVICE_NAME: &str = "form-lock-service";

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查锁存储是否可用
///
/// 存储不可用时返回 503，让负载均衡器摘除该实例。
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store_ok = state.store.health_check().await.is_ok();
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "service": SERVICE_NAME,
            "checks": {
                "store": if store_ok { "ok" } else { "fail" }
            }
        })),
    )
}
