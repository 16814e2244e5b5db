//! 锁存储数据库连接
//!
//! 只负责建立 PostgreSQL 连接池、执行迁移和关闭，锁表的读写在
//! 服务内的 `PgLockStore` 中完成。

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// 锁存储连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池
    ///
    /// 建池时即尝试获取连接，数据库不可达时在 `connect_timeout_seconds` 内
    /// 返回 `SharedError::Database`，由调用方决定是否重试。
    #[instrument(skip(config), fields(db = %redact_url(&config.url)))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let max_connections = config.max_connections.max(1);
        let min_connections = config.min_connections.min(max_connections);
        if min_connections != config.min_connections {
            warn!(
                min_connections = config.min_connections,
                max_connections, "min_connections exceeds max_connections, clamped"
            );
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds.max(1)))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(max_connections, min_connections, "Lock store database connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行锁表迁移
    ///
    /// 迁移脚本由服务通过 `sqlx::migrate!` 在编译期嵌入。
    #[instrument(skip(self, migrator))]
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        let pending = migrator.iter().count();
        migrator.run(&self.pool).await?;
        info!(migrations = pending, "Lock store migrations applied");
        Ok(())
    }

    /// 关闭连接池，等待借出的连接归还
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Lock store database closed");
    }
}

/// 去掉连接串中的密码，用于日志
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let user = rest[..at].split(':').next().unwrap_or_default();
    format!("{scheme}://{user}:***@{}", &rest[at + 1..])
}
