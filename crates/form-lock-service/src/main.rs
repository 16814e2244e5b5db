//! 表单锁服务入口
//!
//! 提供表单签出/签入 REST API 和锁事件推送。

use std::sync::Arc;

use axum::http::HeaderValue;
use form_lock::{
    BroadcastPublisher, LockManager, LockPolicy, LockStore, MemoryLockStore, PgLockStore,
    SystemClock, routes, state::AppState, store::MIGRATOR, worker::ExpireWorker,
};
use locker_shared::{
    config::{AppConfig, StorageBackend},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const SERVICE_NAME: &str = "form-lock-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：config/default.toml → 环境配置 → 服务配置 → LOCKER_ 环境变量
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_default();

    // 从 AppConfig 中提取可观测性配置并注入服务名
    let obs_config = config.observability.clone().with_service_name(SERVICE_NAME);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    let policy = LockPolicy::from_config(&config.lock)?;

    // 初始化存储后端
    let (store, database): (Arc<dyn LockStore>, Option<Database>) = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory lock store - locks are lost on restart");
            (Arc::new(MemoryLockStore::new()) as Arc<dyn LockStore>, None)
        }
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations(&MIGRATOR).await?;
            let store = Arc::new(PgLockStore::new(db.pool().clone())) as Arc<dyn LockStore>;
            (store, Some(db))
        }
    };

    let publisher = Arc::new(BroadcastPublisher::new(config.lock.event_buffer));
    let lock_manager = Arc::new(LockManager::new(
        store.clone(),
        publisher.clone(),
        Arc::new(SystemClock),
        policy,
    ));
    info!(
        backend = ?config.storage.backend,
        default_duration_secs = config.lock.default_duration_secs,
        max_duration_secs = config.lock.max_duration_secs,
        max_total_duration_secs = config.lock.max_total_duration_secs,
        "LockManager initialized"
    );

    // 启动锁过期清理 Worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ExpireWorker::new(lock_manager.clone(), config.lock.sweep_interval_secs);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    // CORS 配置：通过 LOCKER_CORS_ORIGINS 环境变量控制允许的来源
    let allowed_origins = std::env::var("LOCKER_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    let cors = if allowed_origins == "*" {
        if config.is_production() {
            warn!("LOCKER_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        info!("CORS allowed_origins: {}", allowed_origins);
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let state = AppState::new(lock_manager, publisher, store);
    let app = routes::build_router(state).layer(cors);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM 或 Ctrl+C 时停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 通知 Worker 退出并等待当前一轮清理结束
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "ExpireWorker terminated abnormally");
    }

    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
