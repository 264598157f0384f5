// author: kodeholic (powered by Claude)

// TraceHub: floor / 호 제어 이벤트 관찰 버스
//
// 구조:
//   상태머신(arbitrator, participant, towards, call)
//       └── EventSink::publish(event)
//               ├── TraceHub  → broadcast::Sender (mcptt-sim 출력 태스크 등 구독자)
//               └── TraceLog  → 메모리 Vec (테스트 검증용)
//
// 상태머신은 누가 이벤트를 소비하는지 모른다.
// 구독자가 없을 때 publish는 그냥 drop.

use std::sync::{Arc, Mutex};
use serde::Serialize;
use tokio::sync::broadcast;

/// 브로드캐스트 채널 기본 버퍼 크기
const TRACE_BUF: usize = 512;

// ----------------------------------------------------------------------------
// [TraceEvent]
// ----------------------------------------------------------------------------

/// 이벤트 방향
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceDir {
    /// 수신 (Rx)
    In,
    /// 송신 (Tx)
    Out,
    /// 노드 내부
    Sys,
}

/// 이벤트 종류별 페이로드
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    /// 상태 전이 (old, new, trigger)
    StateChange {
        machine: &'static str,
        old:     &'static str,
        new:     &'static str,
        trigger: &'static str,
    },
    /// 메시지 송수신: header는 메시지 요약 문자열
    Message {
        name:   &'static str,
        header: String,
    },
    /// ACK 재전송 한도 초과
    DeliveryFailure {
        name:     &'static str,
        attempts: u32,
    },
    /// Floor Request 재시도 한도 초과
    RequestFailed {
        attempts: u32,
    },
    /// Request 송신 → Granted 수신까지 걸린 시간
    AccessTime {
        millis: u64,
    },
    /// 무시된 메시지 / 잘못된 데이터 등 비치명 오류
    Error {
        reason: String,
    },
}

/// 하나의 관찰 이벤트
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceEvent {
    /// 시뮬레이션 시각 (millis)
    pub ts:      u64,
    pub dir:     TraceDir,
    /// 이벤트를 발생시킨 노드 (클라이언트 user id, 서버는 0)
    pub node:    u32,
    pub call_id: u16,
    /// 관련 user id (없으면 0)
    pub user_id: u32,
    #[serde(flatten)]
    pub kind:    TraceKind,
}

impl TraceEvent {
    pub fn new(ts: u64, dir: TraceDir, node: u32, call_id: u16, user_id: u32, kind: TraceKind) -> Self {
        Self { ts, dir, node, call_id, user_id, kind }
    }

    pub fn is_state_change(&self, machine: &str, new: &str) -> bool {
        matches!(&self.kind, TraceKind::StateChange { machine: m, new: n, .. } if *m == machine && *n == new)
    }

    /// 메시지 이벤트면 (방향, 이름) 반환
    pub fn message(&self) -> Option<(TraceDir, &'static str)> {
        match &self.kind {
            TraceKind::Message { name, .. } => Some((self.dir, *name)),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// [EventSink]
// ----------------------------------------------------------------------------

/// 상태머신이 관찰 이벤트를 밀어넣는 인터페이스
pub trait EventSink {
    fn publish(&self, event: TraceEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn publish(&self, event: TraceEvent) {
        (**self).publish(event)
    }
}

/// 스레드 간에 공유되는 싱크 (시뮬레이션 → 출력 태스크)
pub type SharedSink = Arc<dyn EventSink + Send + Sync>;

/// 이벤트 버리기 (관찰 불필요한 실행)
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: TraceEvent) {}
}

// ----------------------------------------------------------------------------
// [TraceHub]
// ----------------------------------------------------------------------------

pub struct TraceHub {
    tx: broadcast::Sender<TraceEvent>,
}

impl TraceHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(TRACE_BUF)
    }

    /// 긴 시뮬레이션을 느린 구독자가 따라가야 할 때 버퍼 확대
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for TraceHub {
    /// 구독자가 없으면 조용히 무시
    fn publish(&self, event: TraceEvent) {
        let _ = self.tx.send(event);
    }
}

// ----------------------------------------------------------------------------
// [TraceLog] 메모리 기록
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct TraceLog {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl EventSink for TraceLog {
    fn publish(&self, event: TraceEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event(new: &'static str) -> TraceEvent {
        TraceEvent::new(3_000, TraceDir::Sys, 1, 7, 1, TraceKind::StateChange {
            machine: "participant",
            old:     "NoPermission",
            new,
            trigger: "Granted",
        })
    }

    #[test]
    fn publish_without_subscriber_no_panic() {
        let hub = TraceHub::new();
        hub.publish(state_event("HasPermission"));
    }

    #[tokio::test]
    async fn subscribe_receives_event() {
        let hub = TraceHub::new();
        let mut rx = hub.subscribe();

        hub.publish(state_event("HasPermission"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.call_id, 7);
        assert!(event.is_state_change("participant", "HasPermission"));
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let hub = TraceHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.publish(state_event("Queued"));

        assert_eq!(rx1.recv().await.unwrap().ts, 3_000);
        assert_eq!(rx2.recv().await.unwrap().ts, 3_000);
    }

    #[test]
    fn trace_log_records_in_order() {
        let log = TraceLog::new();
        log.publish(state_event("PendingRequest"));
        log.publish(state_event("HasPermission"));
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_state_change("participant", "HasPermission"));
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn trace_event_serializes_flat() {
        let json = serde_json::to_string(&state_event("Queued")).unwrap();
        assert!(json.contains("\"dir\":\"sys\""));
        assert!(json.contains("\"kind\":\"state_change\""));
        assert!(json.contains("\"new\":\"Queued\""));
    }
}
