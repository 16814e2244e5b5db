//! 锁管理器集成测试
//!
//! 使用内存存储 + 手动时钟验证签出/签入/续期/过期的完整语义（无需外部依赖）

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use form_lock::{
    BroadcastPublisher, LockError, LockManager, LockPolicy, LockState, ManualClock,
    MemoryLockStore, store::LockStore,
};
use futures::future::join_all;
use locker_shared::events::{LockEvent, LockEventType};
use locker_shared::test_utils::{test_holder_id, test_lock_policy, test_resource_id};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

// ==================== 测试夹具 ====================

struct Harness {
    manager: Arc<LockManager>,
    store: MemoryLockStore,
    clock: Arc<ManualClock>,
    publisher: Arc<BroadcastPublisher>,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryLockStore::new();
        let clock = Arc::new(ManualClock::default());
        let publisher = Arc::new(BroadcastPublisher::new(256));
        let policy = LockPolicy::from_config(&test_lock_policy()).unwrap();
        let manager = Arc::new(LockManager::new(
            Arc::new(store.clone()),
            publisher.clone(),
            clock.clone(),
            policy,
        ));
        Self {
            manager,
            store,
            clock,
            publisher,
        }
    }

    async fn resource(&self) -> String {
        let id = test_resource_id();
        self.manager.register_resource(&id, None).await.unwrap();
        id
    }

    /// 当前存储中的原始锁数量（包含尚未清理的过期锁）
    async fn raw_lock_count(&self) -> usize {
        self.store
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.lock.is_some())
            .count()
    }
}

fn drain(rx: &mut broadcast::Receiver<LockEvent>) -> Vec<LockEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ==================== 互斥性 ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_check_out_has_exactly_one_winner() {
    let h = Harness::new();
    let resource_id = h.resource().await;

    for round in 0..10 {
        let holders: Vec<String> = (0..32).map(|i| format!("dev-{round}-{i}")).collect();
        let tasks = holders.iter().map(|holder| {
            let manager = h.manager.clone();
            let resource_id = resource_id.clone();
            let holder = holder.clone();
            tokio::spawn(async move { manager.check_out(&resource_id, &holder, None).await })
        });

        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "第 {round} 轮应恰好一个签出成功");
        let already_locked = results
            .iter()
            .filter(|r| matches!(r, Err(LockError::AlreadyLocked { .. })))
            .count();
        assert_eq!(already_locked, holders.len() - 1);

        let winner = winners[0].clone();
        h.manager.check_in(&resource_id, &winner.token).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_out_on_different_resources_all_succeed() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for _ in 0..16 {
        ids.push(h.resource().await);
    }

    let tasks = ids.iter().map(|id| {
        let manager = h.manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.check_out(&id, &test_holder_id(), None).await })
    });

    for joined in join_all(tasks).await {
        assert!(joined.unwrap().is_ok());
    }
    assert_eq!(h.raw_lock_count().await, 16);
}

// ==================== 签出 / 签入 ====================

#[tokio::test]
async fn test_check_out_then_status_is_locked_by_holder() {
    let h = Harness::new();
    let resource_id = h.resource().await;

    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    match h.manager.status(&resource_id).await.unwrap() {
        LockState::Locked {
            holder,
            acquired_at,
            expires_at,
        } => {
            assert_eq!(holder, "alice");
            assert_eq!(acquired_at, lock.acquired_at);
            assert_eq!(expires_at, lock.expires_at);
        }
        LockState::Unlocked => panic!("签出后应为锁定状态"),
    }
    // 测试策略默认时长 1 小时
    assert_eq!(lock.expires_at - lock.acquired_at, ChronoDuration::hours(1));
}

#[tokio::test]
async fn test_check_out_check_in_then_unlocked() {
    let h = Harness::new();
    let resource_id = h.resource().await;

    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();
    h.manager.check_in(&resource_id, &lock.token).await.unwrap();

    assert_eq!(h.manager.status(&resource_id).await.unwrap(), LockState::Unlocked);
    assert_eq!(h.raw_lock_count().await, 0);

    // 签入后其他人可以签出
    assert_ok!(h.manager.check_out(&resource_id, "bob", None).await);
}

#[tokio::test]
async fn test_check_out_by_other_holder_is_rejected() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    let err = h.manager.check_out(&resource_id, "bob", None).await.unwrap_err();
    match err {
        LockError::AlreadyLocked { holder, .. } => assert_eq!(holder, "alice"),
        other => panic!("期望 AlreadyLocked，实际: {other:?}"),
    }
}

#[tokio::test]
async fn test_check_in_with_wrong_token_leaves_lock_unchanged() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();
    let before = h.store.get(&resource_id).await.unwrap().unwrap().lock;

    let err = h.manager.check_in(&resource_id, "not-the-token").await.unwrap_err();
    assert!(matches!(err, LockError::TokenMismatch(_)));

    let after = h.store.get(&resource_id).await.unwrap().unwrap().lock;
    assert_eq!(before, after);
    assert_eq!(after.unwrap().token, lock.token);
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let h = Harness::new();

    assert!(matches!(
        h.manager.check_out("never-registered", "alice", None).await,
        Err(LockError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.check_in("never-registered", "t").await,
        Err(LockError::NotFound(_))
    ));
    assert!(matches!(
        h.manager
            .extend("never-registered", "t", Duration::from_secs(60))
            .await,
        Err(LockError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.status("never-registered").await,
        Err(LockError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_same_holder_re_check_out_refreshes_expiry() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let first = h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    h.clock.advance(ChronoDuration::minutes(20));
    let second = h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    assert_eq!(second.token, first.token);
    assert_eq!(second.expires_at, first.expires_at + ChronoDuration::minutes(20));
    assert_eq!(h.raw_lock_count().await, 1);
}

// ==================== 续期 ====================

#[tokio::test]
async fn test_extend_moves_expiry_by_exact_amount() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    let extended = h
        .manager
        .extend(&resource_id, &lock.token, Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(extended.expires_at - lock.expires_at, ChronoDuration::hours(1));
    assert_eq!(extended.holder, "alice");
    assert_eq!(extended.acquired_at, lock.acquired_at);
    assert_eq!(extended.token, lock.token);
}

#[tokio::test]
async fn test_extend_with_wrong_token_is_rejected() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();

    let err = h
        .manager
        .extend(&resource_id, "forged", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::TokenMismatch(_)));

    let entry = h.store.get(&resource_id).await.unwrap().unwrap();
    assert_eq!(entry.lock.unwrap().expires_at, lock.expires_at);
}

#[tokio::test]
async fn test_extend_past_total_cap_is_expiry_too_far() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    // 测试策略总上限 8 小时
    let lock = h
        .manager
        .check_out(&resource_id, "alice", Some(Duration::from_secs(4 * 3600)))
        .await
        .unwrap();

    let err = h
        .manager
        .extend(&resource_id, &lock.token, Duration::from_secs(5 * 3600))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::ExpiryTooFar(_)));
}

// ==================== 过期 ====================

#[tokio::test]
async fn test_expired_lock_reads_unlocked_before_sweep() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    h.manager
        .check_out(&resource_id, "alice", Some(Duration::from_secs(600)))
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::seconds(600));

    assert_eq!(h.manager.status(&resource_id).await.unwrap(), LockState::Unlocked);
    // 记录仍在存储中，尚未被清理
    assert_eq!(h.raw_lock_count().await, 1);

    let bob = h.manager.check_out(&resource_id, "bob", None).await.unwrap();
    assert_eq!(bob.holder, "bob");
    assert_eq!(h.raw_lock_count().await, 1);
}

#[tokio::test]
async fn test_check_in_after_expiry_is_not_locked() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let lock = h
        .manager
        .check_out(&resource_id, "alice", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(61));

    let err = assert_err!(h.manager.check_in(&resource_id, &lock.token).await);
    assert!(matches!(err, LockError::NotLocked(_)));
}

#[tokio::test]
async fn test_sweep_releases_only_expired_locks() {
    let h = Harness::new();
    let short = h.resource().await;
    let long = h.resource().await;
    let idle = h.resource().await;

    h.manager
        .check_out(&short, "alice", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    h.manager
        .check_out(&long, "bob", Some(Duration::from_secs(3600)))
        .await
        .unwrap();

    h.clock.advance(ChronoDuration::minutes(2));

    assert_eq!(h.manager.sweep_expired().await.unwrap(), 1);
    assert_eq!(h.manager.sweep_expired().await.unwrap(), 0);

    assert!(h.store.get(&short).await.unwrap().unwrap().lock.is_none());
    assert!(h.manager.status(&long).await.unwrap().is_locked());
    assert_eq!(h.manager.status(&idle).await.unwrap(), LockState::Unlocked);
}

#[tokio::test]
async fn test_sweep_does_not_bump_last_modified_at() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let registered = h.store.get(&resource_id).await.unwrap().unwrap().resource;

    h.manager
        .check_out(&resource_id, "alice", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::minutes(5));
    h.manager.sweep_expired().await.unwrap();

    let resource = h.store.get(&resource_id).await.unwrap().unwrap().resource;
    assert_eq!(resource.last_modified_at, registered.last_modified_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sweeps_and_check_outs_release_each_lock_once() {
    const RESOURCES: usize = 32;
    let h = Harness::new();
    let mut ids = Vec::with_capacity(RESOURCES);
    for _ in 0..RESOURCES {
        let id = h.resource().await;
        h.manager
            .check_out(&id, "alice", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        ids.push(id);
    }
    h.clock.advance(ChronoDuration::seconds(61));
    let mut rx = h.publisher.subscribe();

    let sweeps = (0..4).map(|_| {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.sweep_expired().await })
    });
    let check_outs = ids.iter().cloned().map(|id| {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.check_out(&id, "bob", None).await })
    });
    let (sweeps, check_outs) = tokio::join!(join_all(sweeps), join_all(check_outs));

    let swept: usize = sweeps.into_iter().map(|r| r.unwrap().unwrap()).sum();
    for result in check_outs {
        assert_eq!(result.unwrap().unwrap().holder, "bob");
    }

    let released: Vec<LockEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event_type == LockEventType::Available)
        .collect();
    for id in &ids {
        let count = released.iter().filter(|e| &e.resource_id == id).count();
        assert_eq!(count, 1, "{id} 的可用事件应恰好一条");
    }
    assert!(released.iter().all(|e| e.holder.as_deref() == Some("alice")));
    // 每把过期锁要么被清理释放，要么被签出替换，不会两者兼有
    assert!(swept <= RESOURCES);
    assert_eq!(h.raw_lock_count().await, RESOURCES);
    for id in &ids {
        assert!(h.manager.status(id).await.unwrap().is_locked());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_check_in_racing_sweep_on_expired_lock_is_not_locked() {
    const RESOURCES: usize = 16;
    let h = Harness::new();
    let mut locks = Vec::with_capacity(RESOURCES);
    for _ in 0..RESOURCES {
        let id = h.resource().await;
        let lock = h
            .manager
            .check_out(&id, "alice", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        locks.push(lock);
    }
    h.clock.advance(ChronoDuration::seconds(61));
    let mut rx = h.publisher.subscribe();

    let sweeps = (0..4).map(|_| {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.sweep_expired().await })
    });
    let check_ins = locks.iter().cloned().map(|lock| {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.check_in(&lock.resource_id, &lock.token).await })
    });
    let (sweeps, check_ins) = tokio::join!(join_all(sweeps), join_all(check_ins));

    let swept: usize = sweeps.into_iter().map(|r| r.unwrap().unwrap()).sum();
    assert_eq!(swept, RESOURCES);
    for result in check_ins {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, LockError::NotLocked(_)), "{err:?}");
    }

    let released = drain(&mut rx);
    assert_eq!(released.len(), RESOURCES);
    assert!(released.iter().all(|e| e.event_type == LockEventType::Available));
    assert_eq!(h.raw_lock_count().await, 0);
}

// ==================== 事件 ====================

#[tokio::test]
async fn test_events_follow_lock_lifecycle() {
    let h = Harness::new();
    let resource_id = h.resource().await;
    let mut rx = h.publisher.subscribe();

    let lock = h.manager.check_out(&resource_id, "alice", None).await.unwrap();
    h.manager
        .extend(&resource_id, &lock.token, Duration::from_secs(60))
        .await
        .unwrap();
    h.manager.check_in(&resource_id, &lock.token).await.unwrap();
    // 失败操作不产生事件
    let _ = h.manager.check_in(&resource_id, &lock.token).await;

    let kinds: Vec<(LockEventType, Option<String>)> = drain(&mut rx)
        .into_iter()
        .map(|e| (e.event_type, e.holder))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (LockEventType::Locked, Some("alice".to_string())),
            (LockEventType::Locked, Some("alice".to_string())),
            (LockEventType::Available, Some("alice".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_sweep_emits_available_for_each_expired_lock() {
    let h = Harness::new();
    let a = h.resource().await;
    let b = h.resource().await;
    h.manager
        .check_out(&a, "alice", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    h.manager
        .check_out(&b, "bob", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let mut rx = h.publisher.subscribe();
    h.clock.advance(ChronoDuration::minutes(1));
    assert_eq!(h.manager.sweep_expired().await.unwrap(), 2);

    let mut released: Vec<String> = drain(&mut rx)
        .into_iter()
        .inspect(|e| assert_eq!(e.event_type, LockEventType::Available))
        .map(|e| e.resource_id)
        .collect();
    released.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(released, expected);
}

// ==================== 列表 ====================

#[tokio::test]
async fn test_list_reports_lazily_evaluated_state() {
    let h = Harness::new();
    let locked = h.resource().await;
    let expired = h.resource().await;

    h.manager.check_out(&locked, "alice", None).await.unwrap();
    h.manager
        .check_out(&expired, "bob", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    h.clock.advance(ChronoDuration::minutes(1));

    let listed = h.manager.list().await.unwrap();
    let state_of = |id: &str| {
        listed
            .iter()
            .find(|s| s.resource.resource_id == id)
            .map(|s| s.state.clone())
            .unwrap()
    };
    assert!(state_of(&locked).is_locked());
    assert_eq!(state_of(&expired), LockState::Unlocked);
}
