//! 表单锁服务
//!
//! 为表单看板提供签出/签入式的互斥编辑锁：同一时刻每个表单最多
//! 只有一位开发者持有锁，锁带有过期时间，可续期，签入或过期时释放，
//! 每次状态变化都会发布锁事件。
//!
//! ## 模块结构
//!
//! - `lock`: 锁管理器（签出、签入、续期、状态查询、过期清理）
//! - `store`: 锁状态存储（内存 / PostgreSQL）
//! - `notification`: 锁事件发布
//! - `clock`: 可注入的时钟
//! - `handlers` / `routes` / `dto` / `state`: HTTP 接口
//! - `worker`: 后台过期清理 Worker
//! - `error`: 错误类型定义
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 存储：DashMap / sqlx (PostgreSQL)
//! - 数据验证：validator
//! - 序列化：serde (camelCase)

pub mod clock;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod models;
pub mod notification;
pub mod routes;
pub mod state;
pub mod store;
pub mod worker;

// 重新导出核心类型
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LockError, Result};
pub use lock::{LockManager, LockPolicy};
pub use models::{Lock, LockState, Resource, ResourceStatus};
pub use notification::{BroadcastPublisher, LockEventPublisher};
pub use state::AppState;
pub use store::{LockStore, MemoryLockStore, PgLockStore};
