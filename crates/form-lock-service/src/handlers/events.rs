//! 锁事件推送（Server-Sent Events）
//!
//! 每个连接独立订阅广播通道，事件名即事件类型（`locked` / `available`），
//! 数据为 `LockEvent` 的 JSON。消费过慢的连接会跳过被覆盖的旧事件。

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use locker_shared::events::LockEvent;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::{debug, warn};

use crate::state::AppState;

/// 订阅锁事件
///
/// GET /api/v1/events
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(
        subscribers = state.publisher.subscriber_count() + 1,
        "Lock event subscriber connected"
    );

    let stream = BroadcastStream::new(state.publisher.subscribe()).filter_map(|item| match item {
        Ok(event) => to_sse_event(&event).map(Ok::<_, Infallible>),
        Err(e) => {
            warn!(error = %e, "Lock event subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &LockEvent) -> Option<Event> {
    Event::default()
        .event(event.event_type.as_str())
        .json_data(event)
        .map_err(|e| warn!(error = %e, "Failed to encode lock event"))
        .ok()
}
