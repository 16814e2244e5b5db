//! 锁事件发布
//!
//! 锁管理器在每次状态变化后调用 `LockEventPublisher::publish`。
//! 默认实现 `BroadcastPublisher` 通过 tokio broadcast 通道把事件扇出给
//! 所有订阅方（SSE 连接、外部投递协作方）。发布从不阻塞锁操作：
//! 没有订阅方时事件被丢弃，慢订阅方会丢失最旧的事件。

use locker_shared::events::LockEvent;
use locker_shared::observability::metrics;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 锁事件发布接口
#[cfg_attr(test, mockall::automock)]
pub trait LockEventPublisher: Send + Sync {
    fn publish(&self, event: &LockEvent);
}

/// 基于 broadcast 通道的事件发布器
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<LockEvent>,
}

impl BroadcastPublisher {
    /// 创建发布器，`capacity` 为每个订阅方可积压的事件数
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅后续发布的事件
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl LockEventPublisher for BroadcastPublisher {
    fn publish(&self, event: &LockEvent) {
        info!(
            event_type = %event.event_type,
            resource_id = %event.resource_id,
            holder = ?event.holder,
            "Lock event"
        );
        metrics::record_lock_event(event.event_type.as_str());

        if self.sender.send(event.clone()).is_err() {
            debug!(resource_id = %event.resource_id, "No lock event subscribers");
        }
    }
}
