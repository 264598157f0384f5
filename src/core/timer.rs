// author: kodeholic (powered by Claude)

// 엔진과 외부 협력자(스케줄러 / 전송) 사이의 경계
//
// 상태머신은 블로킹하지 않는다. 기다려야 하면 Timer를 걸고 즉시 반환,
// 스케줄러가 만료 시각에 TimerKey로 다시 호출해 준다.
//
//   Scheduler : now / schedule_at / cancel
//   Transport : send(from, to, bytes)
//   EventSink : 관찰 이벤트 (crate::trace)

use std::net::SocketAddr;

use bytes::Bytes;

use crate::protocol::FloorKind;
use crate::trace::{EventSink, TraceDir, TraceEvent, TraceKind};

/// 시뮬레이션 시각 (millis)
pub type Millis = u64;

/// 서버 노드 id: 클라이언트 노드는 user id를 그대로 쓴다
pub const SERVER_NODE: u32 = 0;

/// 스케줄러가 발급하는 취소 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// 타이머 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// 미디어 종료 감지 (holder 침묵)
    T1,
    /// 최대 발언 시간
    T2,
    /// Revoke 후 Release 대기
    T3,
    /// Idle 무활동
    T4,
    /// 이중 floor 최대 점유
    T12,
    /// towards 프록시 ACK 재전송
    AckRetry(FloorKind),
    /// Release 재시도
    T100,
    /// Request 재시도
    T101,
    /// Queue Position Request 재시도
    T104,
    /// 발언 중 미디어 패킷 송신 주기
    MediaTick,
}

/// 타이머 소유자: 노드 안에서 만료를 어디로 보낼지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerOwner {
    Arbitrator,
    Towards(u32),
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub node:    u32,
    pub call_id: u16,
    pub owner:   TimerOwner,
    pub id:      TimerId,
}

impl TimerKey {
    pub fn new(node: u32, call_id: u16, owner: TimerOwner, id: TimerId) -> Self {
        Self { node, call_id, owner, id }
    }
}

// ----------------------------------------------------------------------------
// [외부 서비스 인터페이스]
// ----------------------------------------------------------------------------

pub trait Scheduler {
    fn now(&self) -> Millis;
    /// 같은 시각의 타이머는 등록 순서대로 만료되어야 한다
    fn schedule_at(&mut self, at: Millis, key: TimerKey) -> TimerHandle;
    fn cancel(&mut self, handle: TimerHandle);
}

pub trait Transport {
    /// 같은 (from, to) 쌍 사이에서는 보낸 순서대로 전달되어야 한다
    fn send(&mut self, from: SocketAddr, to: SocketAddr, payload: Bytes);
}

/// 핸들러 호출 한 번 동안 빌려주는 실행 컨텍스트
pub struct Ctx<'a> {
    pub sched: &'a mut dyn Scheduler,
    pub net:   &'a mut dyn Transport,
    pub sink:  &'a dyn EventSink,
}

impl<'a> Ctx<'a> {
    pub fn new(sched: &'a mut dyn Scheduler, net: &'a mut dyn Transport, sink: &'a dyn EventSink) -> Self {
        Self { sched, net, sink }
    }

    pub fn now(&self) -> Millis {
        self.sched.now()
    }

    pub fn send(&mut self, from: SocketAddr, to: SocketAddr, payload: Bytes) {
        self.net.send(from, to, payload);
    }

    /// 현재 시각으로 관찰 이벤트 발행
    pub fn emit(&self, dir: TraceDir, node: u32, call_id: u16, user_id: u32, kind: TraceKind) {
        self.sink.publish(TraceEvent::new(self.now(), dir, node, call_id, user_id, kind));
    }
}

// ----------------------------------------------------------------------------
// [Timer]
// ----------------------------------------------------------------------------

/// 재시작 가능한 단일 타이머
///
/// 만료 콜백은 핸들을 함께 받는다. 이미 취소/재시작된 타이머의 늦은 만료는
/// `expire`가 false를 돌려 걸러낸다.
#[derive(Debug, Clone)]
pub struct Timer {
    key:      TimerKey,
    duration: Millis,
    handle:   Option<TimerHandle>,
    deadline: Option<Millis>,
}

impl Timer {
    pub fn new(key: TimerKey, duration: Millis) -> Self {
        Self { key, duration, handle: None, deadline: None }
    }

    pub fn key(&self) -> TimerKey {
        self.key
    }

    pub fn duration(&self) -> Millis {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Millis) {
        self.duration = duration;
    }

    /// 실행 중이면 취소 후 다시 건다
    pub fn start(&mut self, ctx: &mut Ctx<'_>) {
        self.stop(ctx);
        let at = ctx.now().saturating_add(self.duration);
        self.handle   = Some(ctx.sched.schedule_at(at, self.key));
        self.deadline = Some(at);
    }

    /// 설정된 duration 대신 `delay` 후 만료 (duration은 그대로)
    pub fn start_with(&mut self, ctx: &mut Ctx<'_>, delay: Millis) {
        self.stop(ctx);
        let at = ctx.now().saturating_add(delay);
        self.handle   = Some(ctx.sched.schedule_at(at, self.key));
        self.deadline = Some(at);
    }

    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(handle) = self.handle.take() {
            ctx.sched.cancel(handle);
        }
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn remaining(&self, now: Millis) -> Option<Millis> {
        self.deadline.map(|d| d.saturating_sub(now))
    }

    /// 스케줄러 만료 통지: 현재 걸려 있는 그 타이머일 때만 true
    pub fn expire(&mut self, handle: TimerHandle) -> bool {
        if self.handle == Some(handle) {
            self.handle   = None;
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

/// 재시도 카운터 (C100 / C101 / C104)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    value: u32,
    limit: u32,
}

impl Counter {
    pub fn new(limit: u32) -> Self {
        Self { value: 0, limit }
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn increment(&mut self) {
        self.value = self.value.saturating_add(1);
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_limit_reached(&self) -> bool {
        self.value >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NullSink;

    #[derive(Default)]
    struct FakeSched {
        now:       Millis,
        next:      u64,
        scheduled: Vec<(Millis, TimerHandle)>,
        cancelled: Vec<TimerHandle>,
    }

    impl Scheduler for FakeSched {
        fn now(&self) -> Millis { self.now }
        fn schedule_at(&mut self, at: Millis, _key: TimerKey) -> TimerHandle {
            self.next += 1;
            let h = TimerHandle(self.next);
            self.scheduled.push((at, h));
            h
        }
        fn cancel(&mut self, handle: TimerHandle) {
            self.cancelled.push(handle);
        }
    }

    struct NoNet;
    impl Transport for NoNet {
        fn send(&mut self, _: SocketAddr, _: SocketAddr, _: Bytes) {}
    }

    fn key() -> TimerKey {
        TimerKey::new(SERVER_NODE, 1, TimerOwner::Arbitrator, TimerId::T2)
    }

    #[test]
    fn restart_cancels_previous() {
        let mut sched = FakeSched { now: 500, ..Default::default() };
        let mut net = NoNet;
        let sink = NullSink;
        let mut ctx = Ctx::new(&mut sched, &mut net, &sink);

        let mut t = Timer::new(key(), 1_000);
        t.start(&mut ctx);
        assert_eq!(t.remaining(500), Some(1_000));
        t.start(&mut ctx);
        assert!(t.is_running());

        assert_eq!(sched.scheduled, vec![(1_500, TimerHandle(1)), (1_500, TimerHandle(2))]);
        assert_eq!(sched.cancelled, vec![TimerHandle(1)]);
    }

    #[test]
    fn stale_expiry_is_ignored() {
        let mut sched = FakeSched::default();
        let mut net = NoNet;
        let sink = NullSink;
        let mut ctx = Ctx::new(&mut sched, &mut net, &sink);

        let mut t = Timer::new(key(), 10);
        t.start(&mut ctx);
        t.start(&mut ctx);
        assert!(!t.expire(TimerHandle(1)));
        assert!(t.expire(TimerHandle(2)));
        assert!(!t.is_running());
        assert!(!t.expire(TimerHandle(2)));
    }

    #[test]
    fn start_with_overrides_delay_once() {
        let mut sched = FakeSched { now: 100, ..Default::default() };
        let mut net = NoNet;
        let sink = NullSink;
        let mut ctx = Ctx::new(&mut sched, &mut net, &sink);

        let mut t = Timer::new(key(), 3_000);
        t.start_with(&mut ctx, 0);
        assert_eq!(t.remaining(100), Some(0));
        assert_eq!(t.duration(), 3_000);
        t.start(&mut ctx);

        assert_eq!(sched.scheduled, vec![(100, TimerHandle(1)), (3_100, TimerHandle(2))]);
        assert_eq!(sched.cancelled, vec![TimerHandle(1)]);
    }

    #[test]
    fn counter_limit() {
        let mut c = Counter::new(2);
        assert!(!c.is_limit_reached());
        c.increment();
        c.increment();
        assert!(c.is_limit_reached());
        c.reset();
        assert_eq!(c.value(), 0);
    }
}
