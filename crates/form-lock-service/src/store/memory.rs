//! 内存锁存储
//!
//! 使用 DashMap 实现的高并发内存存储，适用于测试、开发和单实例部署。
//! `mutate` 在持有资源所在分片写锁的情况下同步执行变更函数，
//! 因此同一资源上的并发变更天然串行化，不同分片之间互不阻塞。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Applied, LockMutation, LockStore, ResourceEntry, Transition, apply_transition};
use crate::error::{LockError, Result};
use crate::models::Resource;

/// 内存锁存储
#[derive(Debug, Default, Clone)]
pub struct MemoryLockStore {
    entries: Arc<DashMap<String, ResourceEntry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前登记的资源数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn register(&self, resource: Resource) -> Result<Resource> {
        let entry = self
            .entries
            .entry(resource.resource_id.clone())
            .or_insert_with(|| ResourceEntry {
                resource,
                lock: None,
            });
        Ok(entry.resource.clone())
    }

    async fn get(&self, resource_id: &str) -> Result<Option<ResourceEntry>> {
        Ok(self.entries.get(resource_id).map(|e| e.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ResourceEntry>> {
        let mut entries: Vec<ResourceEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.resource.resource_id.cmp(&b.resource.resource_id));
        Ok(entries)
    }

    async fn mutate(&self, resource_id: &str, mutation: LockMutation<'_>) -> Result<Applied> {
        let mut entry = self
            .entries
            .get_mut(resource_id)
            .ok_or_else(|| LockError::NotFound(resource_id.to_string()))?;

        let transition = mutation(entry.lock.as_ref())?;

        let previous = entry.lock.clone();
        if let Transition::Remove {
            modified_at: Some(at),
        } = &transition
        {
            entry.resource.last_modified_at = *at;
        }
        entry.lock = apply_transition(previous.as_ref(), &transition);

        Ok(Applied {
            previous,
            current: entry.lock.clone(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lock;
    use chrono::{Duration, Utc};

    fn lock_for(resource_id: &str, holder: &str) -> Lock {
        let now = Utc::now();
        Lock {
            resource_id: resource_id.into(),
            holder: holder.into(),
            acquired_at: now,
            expires_at: now + Duration::hours(1),
            token: format!("{holder}-token"),
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let store = MemoryLockStore::new();
        let now = Utc::now();

        let first = store
            .register(Resource::new("deploy-checklist", "Deploy checklist", now))
            .await
            .unwrap();
        let second = store
            .register(Resource::new("deploy-checklist", "Renamed", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.name, "Deploy checklist");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_mutate_unknown_resource_is_not_found() {
        let store = MemoryLockStore::new();
        let err = store
            .mutate("missing", Box::new(|_| Ok(Transition::Keep)))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_mutate_put_then_remove() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        store
            .register(Resource::new("journal", "Journal", now))
            .await
            .unwrap();

        let lock = lock_for("journal", "alice");
        let applied = store
            .mutate("journal", Box::new(|_| Ok(Transition::Put(lock.clone()))))
            .await
            .unwrap();
        assert_eq!(applied.previous, None);
        assert_eq!(applied.current.as_ref(), Some(&lock));

        let modified_at = now + Duration::minutes(30);
        let applied = store
            .mutate(
                "journal",
                Box::new(move |_| {
                    Ok(Transition::Remove {
                        modified_at: Some(modified_at),
                    })
                }),
            )
            .await
            .unwrap();
        assert_eq!(applied.previous.as_ref(), Some(&lock));
        assert_eq!(applied.current, None);

        let entry = store.get("journal").await.unwrap().unwrap();
        assert_eq!(entry.lock, None);
        assert_eq!(entry.resource.last_modified_at, modified_at);
    }

    #[tokio::test]
    async fn test_mutation_error_leaves_state_untouched() {
        let store = MemoryLockStore::new();
        store
            .register(Resource::new("journal", "Journal", Utc::now()))
            .await
            .unwrap();
        let lock = lock_for("journal", "alice");
        store
            .mutate("journal", Box::new(|_| Ok(Transition::Put(lock.clone()))))
            .await
            .unwrap();

        let err = store
            .mutate(
                "journal",
                Box::new(|_| Err(LockError::TokenMismatch("journal".into()))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::TokenMismatch(_)));

        let entry = store.get("journal").await.unwrap().unwrap();
        assert_eq!(entry.lock, Some(lock));
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_id() {
        let store = MemoryLockStore::new();
        let now = Utc::now();
        for id in ["sprint-retro", "deploy-checklist", "journal"] {
            store.register(Resource::new(id, id, now)).await.unwrap();
        }

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.resource.resource_id)
            .collect();
        assert_eq!(ids, vec!["deploy-checklist", "journal", "sprint-retro"]);
    }
}
