//! 表单锁领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 可编辑资源（如部署检查单、工作日志表单）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: String,
    /// 展示名称
    pub name: String,
    /// 最近一次签入时间，尚未被签入过时等于注册时间
    pub last_modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(resource_id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            resource_id: resource_id.into(),
            name: name.into(),
            last_modified_at: now,
            created_at: now,
        }
    }
}

/// 资源上的互斥锁记录
///
/// `token` 是持有凭证，签入和续期都必须携带。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub resource_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub token: String,
}

impl Lock {
    /// 在给定时刻锁是否仍然有效（`now < expires_at`）
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// 转换为对外可见的锁状态（不含令牌）
    pub fn state_at(&self, now: DateTime<Utc>) -> LockState {
        if self.is_active_at(now) {
            LockState::Locked {
                holder: self.holder.clone(),
                acquired_at: self.acquired_at,
                expires_at: self.expires_at,
            }
        } else {
            LockState::Unlocked
        }
    }
}

/// 资源锁状态
///
/// 过期但尚未被清理的锁一律视为 `Unlocked`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    #[serde(rename_all = "camelCase")]
    Locked {
        holder: String,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// 看板展示用的资源及其锁状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub resource: Resource,
    pub state: LockState,
}
