//! 表单锁管理器
//!
//! 负责资源的签出/签入/续期/过期释放。所有写操作都通过存储层的
//! 原子 `mutate` 完成，因此同一资源上的签出、签入、续期彼此线性一致。
//!
//! 过期判断采用"惰性 + 定期"两种方式：
//! - 每次访问都以操作开始时读取的 `now` 快照判断锁是否有效，
//!   过期但未被清理的锁既不会被 `status` 看作已锁定，也不会阻塞签出；
//! - `sweep_expired` 由后台 Worker 周期调用，删除过期记录并发布可用事件。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use locker_shared::config::LockPolicyConfig;
use locker_shared::events::LockEvent;
use locker_shared::observability::metrics;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{LockError, Result};
use crate::models::{Lock, LockState, Resource, ResourceStatus};
use crate::notification::LockEventPublisher;
use crate::store::{LockStore, Transition};

const MAX_RESOURCE_ID_LEN: usize = 128;
const MAX_HOLDER_LEN: usize = 64;
const MAX_NAME_LEN: usize = 256;

/// 锁策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// 未指定时长时的默认锁定时长
    pub default_duration: Duration,
    /// 单次签出的最大时长
    pub max_duration: Duration,
    /// 从签出时刻起算的最大总时长（续期上限）
    pub max_total_duration: Duration,
}

impl LockPolicy {
    /// 从配置构建策略，要求 `0 < default <= max <= max_total`
    pub fn from_config(config: &LockPolicyConfig) -> Result<Self> {
        let default_duration = seconds(config.default_duration_secs, "default_duration_secs")?;
        let max_duration = seconds(config.max_duration_secs, "max_duration_secs")?;
        let max_total_duration =
            seconds(config.max_total_duration_secs, "max_total_duration_secs")?;

        if default_duration > max_duration {
            return Err(LockError::InvalidArgument(
                "default_duration_secs 不能大于 max_duration_secs".to_string(),
            ));
        }
        if max_duration > max_total_duration {
            return Err(LockError::InvalidArgument(
                "max_duration_secs 不能大于 max_total_duration_secs".to_string(),
            ));
        }

        Ok(Self {
            default_duration,
            max_duration,
            max_total_duration,
        })
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            default_duration: Duration::hours(2),
            max_duration: Duration::hours(8),
            max_total_duration: Duration::hours(24),
        }
    }
}

fn seconds(value: u64, field: &str) -> Result<Duration> {
    i64::try_from(value)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| LockError::InvalidArgument(format!("{field} 必须为正数且不超出范围")))
}

/// 表单锁管理器
pub struct LockManager {
    store: Arc<dyn LockStore>,
    publisher: Arc<dyn LockEventPublisher>,
    clock: Arc<dyn Clock>,
    policy: LockPolicy,
}

impl LockManager {
    /// 创建锁管理器
    ///
    /// # Arguments
    /// - `store`: 锁状态存储
    /// - `publisher`: 锁事件发布器
    /// - `clock`: 时钟（测试中可注入手动时钟）
    /// - `policy`: 锁时长策略
    pub fn new(
        store: Arc<dyn LockStore>,
        publisher: Arc<dyn LockEventPublisher>,
        clock: Arc<dyn Clock>,
        policy: LockPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            policy,
        }
    }

    /// 使用系统时钟和默认策略创建锁管理器
    pub fn with_defaults(store: Arc<dyn LockStore>, publisher: Arc<dyn LockEventPublisher>) -> Self {
        Self::new(store, publisher, Arc::new(SystemClock), LockPolicy::default())
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// 注册资源
    ///
    /// 幂等：资源已存在时返回已有记录。`name` 为空时使用资源 ID。
    #[instrument(skip(self))]
    pub async fn register_resource(&self, resource_id: &str, name: Option<&str>) -> Result<Resource> {
        validate_resource_id(resource_id)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(resource_id);
        if name.chars().count() > MAX_NAME_LEN {
            return Err(LockError::InvalidArgument(format!(
                "资源名称不能超过 {MAX_NAME_LEN} 个字符"
            )));
        }

        let resource = self
            .store
            .register(Resource::new(resource_id, name, self.now()))
            .await?;

        info!(resource_id = %resource.resource_id, "Resource registered");
        Ok(resource)
    }

    /// 签出资源
    ///
    /// - 资源上存在其他持有者的有效锁时返回 `AlreadyLocked`
    /// - 同一持有者重复签出会刷新签出时间和过期时间，令牌保持不变
    /// - 过期锁直接被新锁替换，并先为旧持有者发布一条可用事件
    #[instrument(skip(self))]
    pub async fn check_out(
        &self,
        resource_id: &str,
        holder: &str,
        duration_hint: Option<StdDuration>,
    ) -> Result<Lock> {
        let result = self.try_check_out(resource_id, holder, duration_hint).await;
        track("checkout", result)
    }

    async fn try_check_out(
        &self,
        resource_id: &str,
        holder: &str,
        duration_hint: Option<StdDuration>,
    ) -> Result<Lock> {
        validate_resource_id(resource_id)?;
        let holder = validate_holder(holder)?;
        let duration = self.resolve_duration(duration_hint)?;
        let now = self.now();
        let expires_at = checked_expiry(now, duration, resource_id)?;
        let fresh_token = Uuid::new_v4().to_string();

        let applied = self
            .store
            .mutate(
                resource_id,
                Box::new(move |current| match current {
                    Some(lock) if lock.is_active_at(now) => {
                        if lock.holder != holder {
                            return Err(LockError::AlreadyLocked {
                                resource_id: resource_id.to_string(),
                                holder: lock.holder.clone(),
                            });
                        }
                        Ok(Transition::Put(Lock {
                            acquired_at: now,
                            expires_at,
                            ..lock.clone()
                        }))
                    }
                    _ => Ok(Transition::Put(Lock {
                        resource_id: resource_id.to_string(),
                        holder: holder.to_string(),
                        acquired_at: now,
                        expires_at,
                        token: fresh_token,
                    })),
                }),
            )
            .await?;

        let lock = applied
            .current
            .ok_or_else(|| LockError::Internal("签出后锁记录缺失".to_string()))?;

        if let Some(stale) = applied.previous.filter(|p| !p.is_active_at(now)) {
            debug!(resource_id = %resource_id, stale_holder = %stale.holder, "Replaced expired lock");
            self.publisher
                .publish(&LockEvent::available(resource_id, Some(stale.holder), now));
        }
        self.publisher
            .publish(&LockEvent::locked(resource_id, lock.holder.as_str(), now));

        info!(
            resource_id = %resource_id,
            holder = %lock.holder,
            expires_at = %lock.expires_at,
            "Resource checked out"
        );
        Ok(lock)
    }

    /// 签入资源（释放锁）
    ///
    /// 没有有效锁时返回 `NotLocked`，令牌不匹配时返回 `TokenMismatch`。
    /// 成功后刷新资源的最后修改时间。
    #[instrument(skip(self, token))]
    pub async fn check_in(&self, resource_id: &str, token: &str) -> Result<()> {
        let result = self.try_check_in(resource_id, token).await;
        track("checkin", result)
    }

    async fn try_check_in(&self, resource_id: &str, token: &str) -> Result<()> {
        validate_resource_id(resource_id)?;
        validate_token(token)?;
        let now = self.now();

        let applied = self
            .store
            .mutate(
                resource_id,
                Box::new(move |current| {
                    let lock = active_lock(current, now, resource_id)?;
                    verify_token(lock, token, resource_id)?;
                    Ok(Transition::Remove {
                        modified_at: Some(now),
                    })
                }),
            )
            .await?;

        let holder = applied.previous.map(|lock| lock.holder);
        info!(resource_id = %resource_id, holder = ?holder, "Resource checked in");
        self.publisher
            .publish(&LockEvent::available(resource_id, holder, now));
        Ok(())
    }

    /// 续期
    ///
    /// 过期时间在原值基础上前移 `additional`，但不能超过
    /// `acquired_at + max_total_duration`，否则返回 `ExpiryTooFar`。
    #[instrument(skip(self, token))]
    pub async fn extend(&self, resource_id: &str, token: &str, additional: StdDuration) -> Result<Lock> {
        let result = self.try_extend(resource_id, token, additional).await;
        track("extend", result)
    }

    async fn try_extend(&self, resource_id: &str, token: &str, additional: StdDuration) -> Result<Lock> {
        validate_resource_id(resource_id)?;
        validate_token(token)?;
        let additional = positive_duration(additional, "additionalDuration")?;
        let max_total = self.policy.max_total_duration;
        let now = self.now();

        let applied = self
            .store
            .mutate(
                resource_id,
                Box::new(move |current| {
                    let lock = active_lock(current, now, resource_id)?;
                    verify_token(lock, token, resource_id)?;

                    let too_far = || LockError::ExpiryTooFar(resource_id.to_string());
                    let expires_at = lock
                        .expires_at
                        .checked_add_signed(additional)
                        .ok_or_else(too_far)?;
                    let ceiling = lock
                        .acquired_at
                        .checked_add_signed(max_total)
                        .ok_or_else(too_far)?;
                    if expires_at > ceiling {
                        return Err(too_far());
                    }

                    Ok(Transition::Put(Lock {
                        expires_at,
                        ..lock.clone()
                    }))
                }),
            )
            .await?;

        let lock = applied
            .current
            .ok_or_else(|| LockError::Internal("续期后锁记录缺失".to_string()))?;

        info!(
            resource_id = %resource_id,
            holder = %lock.holder,
            expires_at = %lock.expires_at,
            "Lock extended"
        );
        self.publisher
            .publish(&LockEvent::locked(resource_id, lock.holder.as_str(), now));
        Ok(lock)
    }

    /// 查询资源锁状态（只读）
    ///
    /// 未知资源返回 `NotFound`；过期锁视为未锁定。
    pub async fn status(&self, resource_id: &str) -> Result<LockState> {
        let now = self.now();
        let entry = self
            .store
            .get(resource_id)
            .await?
            .ok_or_else(|| LockError::NotFound(resource_id.to_string()))?;

        Ok(entry
            .lock
            .map(|lock| lock.state_at(now))
            .unwrap_or(LockState::Unlocked))
    }

    /// 列出所有资源及其锁状态
    pub async fn list(&self) -> Result<Vec<ResourceStatus>> {
        let now = self.now();
        let entries = self.store.list().await?;

        Ok(entries
            .into_iter()
            .map(|entry| ResourceStatus {
                state: entry
                    .lock
                    .map(|lock| lock.state_at(now))
                    .unwrap_or(LockState::Unlocked),
                resource: entry.resource,
            })
            .collect())
    }

    /// 清理过期锁，返回释放数量
    ///
    /// 每个候选锁在存储的原子区内以同一个 `now` 快照重新判断是否过期，
    /// 在扫描与删除之间被重新签出的资源保持不变，不会重复释放。
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.now();
        let candidates: Vec<Lock> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|entry| entry.lock)
            .filter(|lock| !lock.is_active_at(now))
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        let mut released = 0usize;
        for stale in candidates {
            let result = self
                .store
                .mutate(
                    &stale.resource_id,
                    Box::new(move |current| match current {
                        Some(lock) if !lock.is_active_at(now) => {
                            Ok(Transition::Remove { modified_at: None })
                        }
                        _ => Ok(Transition::Keep),
                    }),
                )
                .await;

            match result {
                Ok(applied) if applied.current.is_none() => {
                    let Some(previous) = applied.previous else {
                        continue;
                    };
                    released += 1;
                    info!(
                        resource_id = %previous.resource_id,
                        holder = %previous.holder,
                        expired_at = %previous.expires_at,
                        "Expired lock released"
                    );
                    self.publisher.publish(&LockEvent::available(
                        previous.resource_id.as_str(),
                        Some(previous.holder),
                        now,
                    ));
                }
                Ok(_) | Err(LockError::NotFound(_)) => {}
                Err(e) => {
                    warn!(resource_id = %stale.resource_id, error = %e, "Failed to release expired lock");
                }
            }
        }

        metrics::record_lock_expirations(released as u64);
        Ok(released)
    }

    /// 当前时间，截断到微秒
    ///
    /// PostgreSQL `TIMESTAMPTZ` 只保存微秒，返回给调用方的时间必须与落库值一致。
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    /// 计算签出时长：未指定用默认值，超出上限截断到上限
    fn resolve_duration(&self, hint: Option<StdDuration>) -> Result<Duration> {
        match hint {
            None => Ok(self.policy.default_duration),
            Some(hint) => {
                if hint < StdDuration::from_secs(1) {
                    return Err(LockError::InvalidArgument(
                        "durationHint 必须至少为 1 秒".to_string(),
                    ));
                }
                Ok(to_micros(hint)
                    .map(|d| d.min(self.policy.max_duration))
                    .unwrap_or(self.policy.max_duration))
            }
        }
    }
}

/// 记录操作结果指标
fn track<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => metrics::record_lock_operation(operation, "ok"),
        Err(e) => metrics::record_lock_operation(operation, e.error_code()),
    }
    result
}

/// 取当前有效锁，不存在或已过期时返回 `NotLocked`
fn active_lock<'a>(
    current: Option<&'a Lock>,
    now: DateTime<Utc>,
    resource_id: &str,
) -> Result<&'a Lock> {
    current
        .filter(|lock| lock.is_active_at(now))
        .ok_or_else(|| LockError::NotLocked(resource_id.to_string()))
}

fn verify_token(lock: &Lock, token: &str, resource_id: &str) -> Result<()> {
    if lock.token != token {
        return Err(LockError::TokenMismatch(resource_id.to_string()));
    }
    Ok(())
}

fn checked_expiry(now: DateTime<Utc>, duration: Duration, resource_id: &str) -> Result<DateTime<Utc>> {
    now.checked_add_signed(duration)
        .ok_or_else(|| LockError::ExpiryTooFar(resource_id.to_string()))
}

fn positive_duration(value: StdDuration, field: &str) -> Result<Duration> {
    if value < StdDuration::from_secs(1) {
        return Err(LockError::InvalidArgument(format!("{field} 必须至少为 1 秒")));
    }
    to_micros(value).ok_or_else(|| LockError::InvalidArgument(format!("{field} 超出范围")))
}

/// 按微秒精度转换时长，不足一微秒的部分舍去
fn to_micros(value: StdDuration) -> Option<Duration> {
    i64::try_from(value.as_micros())
        .ok()
        .map(Duration::microseconds)
}

/// 资源 ID：1..=128 个字符，仅允许字母、数字和 `_ . : -`
fn validate_resource_id(resource_id: &str) -> Result<()> {
    let valid = !resource_id.is_empty()
        && resource_id.len() <= MAX_RESOURCE_ID_LEN
        && resource_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if !valid {
        return Err(LockError::InvalidArgument(format!(
            "资源 ID 格式无效: {resource_id:?}"
        )));
    }
    Ok(())
}

/// 持有者：去除首尾空白后 1..=64 个字符
fn validate_holder(holder: &str) -> Result<&str> {
    let holder = holder.trim();
    if holder.is_empty() || holder.chars().count() > MAX_HOLDER_LEN {
        return Err(LockError::InvalidArgument(format!(
            "持有者长度必须在 1 到 {MAX_HOLDER_LEN} 个字符之间"
        )));
    }
    Ok(holder)
}

fn validate_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(LockError::InvalidArgument("token 不能为空".to_string()));
    }
    Ok(())
}
