//! 表单锁模块
//!
//! 保证同一时刻每个资源最多只有一个有效锁：
//! 签出（check-out）获取锁，签入（check-in）释放锁，续期（extend）推迟过期，
//! 过期锁由后台 Worker 定期清理，也会在下一次访问时被惰性判定为失效。

mod lock_manager;

pub use lock_manager::{LockManager, LockPolicy};
