//! PostgreSQL 锁存储
//!
//! `mutate` 在事务内对资源行执行 `SELECT ... FOR UPDATE`，
//! 同一资源上的并发变更因此按行锁串行化；事务被中途丢弃时自动回滚，
//! 不会留下半完成的状态。

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::{debug, instrument};

use super::{Applied, LockMutation, LockStore, ResourceEntry, Transition, apply_transition};
use crate::error::{LockError, Result};
use crate::models::{Lock, Resource};

/// 锁服务的数据库迁移（编译期嵌入）
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const RESOURCE_COLUMNS: &str = "resource_id, name, last_modified_at, created_at";
const LOCK_COLUMNS: &str = "resource_id, holder, acquired_at, expires_at, token";

/// PostgreSQL 锁存储
#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    #[instrument(skip(self, resource), fields(resource_id = %resource.resource_id))]
    async fn register(&self, resource: Resource) -> Result<Resource> {
        sqlx::query(
            r#"
            INSERT INTO lock_resources (resource_id, name, last_modified_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (resource_id) DO NOTHING
            "#,
        )
        .bind(&resource.resource_id)
        .bind(&resource.name)
        .bind(resource.last_modified_at)
        .bind(resource.created_at)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_as::<_, Resource>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM lock_resources WHERE resource_id = $1"
        ))
        .bind(&resource.resource_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn get(&self, resource_id: &str) -> Result<Option<ResourceEntry>> {
        let resource = sqlx::query_as::<_, Resource>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM lock_resources WHERE resource_id = $1"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(resource) = resource else {
            return Ok(None);
        };

        let lock = sqlx::query_as::<_, Lock>(&format!(
            "SELECT {LOCK_COLUMNS} FROM resource_locks WHERE resource_id = $1"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(ResourceEntry { resource, lock }))
    }

    async fn list(&self) -> Result<Vec<ResourceEntry>> {
        let resources = sqlx::query_as::<_, Resource>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM lock_resources ORDER BY resource_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut locks: HashMap<String, Lock> =
            sqlx::query_as::<_, Lock>(&format!("SELECT {LOCK_COLUMNS} FROM resource_locks"))
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|lock| (lock.resource_id.clone(), lock))
                .collect();

        Ok(resources
            .into_iter()
            .map(|resource| {
                let lock = locks.remove(&resource.resource_id);
                ResourceEntry { resource, lock }
            })
            .collect())
    }

    #[instrument(skip(self, mutation))]
    async fn mutate(&self, resource_id: &str, mutation: LockMutation<'_>) -> Result<Applied> {
        let mut tx = self.pool.begin().await?;

        // 资源行锁：同一资源上的所有变更在此串行
        let exists = sqlx::query_scalar::<_, String>(
            "SELECT resource_id FROM lock_resources WHERE resource_id = $1 FOR UPDATE",
        )
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_none() {
            tx.rollback().await?;
            return Err(LockError::NotFound(resource_id.to_string()));
        }

        let previous = sqlx::query_as::<_, Lock>(&format!(
            "SELECT {LOCK_COLUMNS} FROM resource_locks WHERE resource_id = $1"
        ))
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?;

        let transition = match mutation(previous.as_ref()) {
            Ok(transition) => transition,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        match &transition {
            Transition::Keep => {}
            Transition::Put(lock) => {
                sqlx::query(
                    r#"
                    INSERT INTO resource_locks (resource_id, holder, token, acquired_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (resource_id) DO UPDATE SET
                        holder = EXCLUDED.holder,
                        token = EXCLUDED.token,
                        acquired_at = EXCLUDED.acquired_at,
                        expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(resource_id)
                .bind(&lock.holder)
                .bind(&lock.token)
                .bind(lock.acquired_at)
                .bind(lock.expires_at)
                .execute(&mut *tx)
                .await?;
            }
            Transition::Remove { modified_at } => {
                sqlx::query("DELETE FROM resource_locks WHERE resource_id = $1")
                    .bind(resource_id)
                    .execute(&mut *tx)
                    .await?;

                if let Some(at) = modified_at {
                    sqlx::query(
                        "UPDATE lock_resources SET last_modified_at = $2 WHERE resource_id = $1",
                    )
                    .bind(resource_id)
                    .bind(at)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;

        debug!(resource_id = %resource_id, transition = ?transition, "Lock mutation committed");

        let current = apply_transition(previous.as_ref(), &transition);
        Ok(Applied { previous, current })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
