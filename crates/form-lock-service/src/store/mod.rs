//! 锁状态存储
//!
//! 存储层只提供一个原子原语 `mutate`：在同一资源上串行执行
//! "读取当前锁 → 计算迁移 → 写回" 三步，这是所有签出、签入、续期、
//! 过期清理共同依赖的比较并交换语义。不同资源之间没有全局锁。
//!
//! - `MemoryLockStore`: 基于 DashMap 的进程内存储
//! - `PgLockStore`: 基于 PostgreSQL 行锁的持久化存储

mod memory;
mod postgres;

pub use memory::MemoryLockStore;
pub use postgres::{MIGRATOR, PgLockStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Lock, Resource};

/// 资源及其原始锁记录（锁可能已过期，由调用方按时间判断）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub resource: Resource,
    pub lock: Option<Lock>,
}

/// 一次原子变更要落地的锁迁移
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// 不做任何修改
    Keep,
    /// 写入（新建或覆盖）锁记录
    Put(Lock),
    /// 删除锁记录；`modified_at` 有值时同时刷新资源的最后修改时间
    Remove { modified_at: Option<DateTime<Utc>> },
}

/// 变更前后的锁记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub previous: Option<Lock>,
    pub current: Option<Lock>,
}

/// 在存储的原子区内执行的变更函数
///
/// 必须是同步、无阻塞的纯计算；返回错误时不写入任何内容。
pub type LockMutation<'a> = Box<dyn FnOnce(Option<&Lock>) -> Result<Transition> + Send + 'a>;

/// 锁状态存储接口
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 注册资源；已存在时返回已有记录，不做修改
    async fn register(&self, resource: Resource) -> Result<Resource>;

    async fn get(&self, resource_id: &str) -> Result<Option<ResourceEntry>>;

    /// 按资源 ID 升序列出全部资源
    async fn list(&self) -> Result<Vec<ResourceEntry>>;

    /// 对单个资源的锁执行原子变更
    ///
    /// 资源不存在时返回 `LockError::NotFound`。
    async fn mutate(&self, resource_id: &str, mutation: LockMutation<'_>) -> Result<Applied>;

    async fn health_check(&self) -> Result<()>;
}

/// 把迁移应用到当前锁上，返回变更后的锁
fn apply_transition(current: Option<&Lock>, transition: &Transition) -> Option<Lock> {
    match transition {
        Transition::Keep => current.cloned(),
        Transition::Put(lock) => Some(lock.clone()),
        Transition::Remove { .. } => None,
    }
}
