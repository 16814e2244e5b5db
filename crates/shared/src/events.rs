//! 锁通知事件模型
//!
//! 定义表单锁状态变化时对外发布的事件格式。事件由锁服务在进程内发布，
//! 投递到具体渠道（页面推送、IM 通知等）由外部协作方负责。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 锁事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockEventType {
    /// 资源被签出（或锁被续期、同一持有者重复签出）
    Locked,
    /// 资源重新可用（签入或过期释放）
    Available,
}

impl LockEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 锁事件
///
/// 序列化格式：`{type, resourceId, holder?, timestamp}`。
/// `available` 事件的 `holder` 为释放前的持有者，便于前端提示"某某已签入"。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEvent {
    #[serde(rename = "type")]
    pub event_type: LockEventType,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LockEvent {
    /// 资源被锁定
    pub fn locked(
        resource_id: impl Into<String>,
        holder: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: LockEventType::Locked,
            resource_id: resource_id.into(),
            holder: Some(holder.into()),
            timestamp,
        }
    }

    /// 资源可用
    pub fn available(
        resource_id: impl Into<String>,
        previous_holder: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: LockEventType::Available,
            resource_id: resource_id.into(),
            holder: previous_holder,
            timestamp,
        }
    }
}
