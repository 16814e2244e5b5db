//! 共享库
//!
//! 包含表单锁服务使用的配置、错误处理、数据库连接、事件模型与可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod observability;
pub mod test_utils;
