//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use crate::lock::LockManager;
use crate::notification::BroadcastPublisher;
use crate::store::LockStore;

/// Axum 应用共享状态
///
/// 锁管理器、事件广播和存储通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    pub lock_manager: Arc<LockManager>,
    /// SSE 订阅使用的事件广播
    pub publisher: Arc<BroadcastPublisher>,
    /// 就绪探针直接检查存储
    pub store: Arc<dyn LockStore>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        lock_manager: Arc<LockManager>,
        publisher: Arc<BroadcastPublisher>,
        store: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            lock_manager,
            publisher,
            store,
        }
    }
}
