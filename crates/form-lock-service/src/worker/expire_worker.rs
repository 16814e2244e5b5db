//! 锁过期清理 Worker
//!
//! 定期调用 `LockManager::sweep_expired` 删除已过期的锁并发布可用事件。
//! 过期判断本身是惰性的，Worker 只负责及时释放记录和通知订阅方，
//! 因此某一轮清理失败不会影响锁语义，下一轮会继续处理。

use std::sync::Arc;
use std::time::Duration;

use locker_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::lock::LockManager;

/// 过期清理 Worker
pub struct ExpireWorker {
    manager: Arc<LockManager>,
    /// 轮询间隔
    poll_interval: Duration,
}

impl ExpireWorker {
    /// 创建 ExpireWorker 实例
    ///
    /// # 参数
    /// - `manager`: 锁管理器
    /// - `poll_interval_secs`: 轮询间隔（秒），最小 1 秒
    pub fn new(manager: Arc<LockManager>, poll_interval_secs: u64) -> Self {
        Self {
            manager,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    /// 使用默认配置（30 秒）创建 ExpireWorker
    pub fn with_defaults(manager: Arc<LockManager>) -> Self {
        Self::new(manager, 30)
    }

    /// 直接指定轮询间隔，测试中用于亚秒级轮询
    pub fn with_interval(manager: Arc<LockManager>, poll_interval: Duration) -> Self {
        Self {
            manager,
            poll_interval,
        }
    }

    /// 主循环：持续清理过期锁，直到 `shutdown` 变为 true 或发送端被丢弃
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "ExpireWorker 已启动");

        loop {
            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("ExpireWorker 已停止");
    }

    /// 执行一轮清理
    pub async fn run_once(&self) {
        match self.manager.sweep_expired().await {
            Ok(0) => debug!("No expired locks"),
            Ok(released) => info!(released, "Expired locks released"),
            Err(e) => error!(error = %e, "清理过期锁出错"),
        }

        // 记录 Worker 健康状态
        metrics::set_worker_last_run("expire_worker");
    }
}
