// author: kodeholic (powered by Claude)
// 이산 사건 시뮬레이터: 엔진 바깥 협력자의 기준 구현
//
// 구조:
//   EventQueue : (시각, 등록 순번) 최소 힙. 같은 시각은 등록 순서대로 (FIFO)
//   Outbox     : 핸들러 한 번 동안 쌓인 송신 → 처리 후 now + latency로 배달 예약
//   Simulation : 서버 1대 + 단말 N대, 사용자 동작(Action) 예약 / 실행
//
// 모든 에러는 여기서 삼킨다. tracing 로그 + TraceKind::Error 이벤트만 남긴다.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::config::{CallTypePriorities, FloorConfig, ParticipantConfig};
use crate::core::arbitrator::ArbitratorState;
use crate::core::client::PttApp;
use crate::core::participant::ParticipantState;
use crate::core::server::CallServer;
use crate::core::timer::{Ctx, Millis, Scheduler, TimerHandle, TimerKey, Transport, SERVER_NODE};
use crate::error::{McpttError, McpttResult};
use crate::protocol::{CallType, UserLoc};
use crate::trace::{SharedSink, TraceDir, TraceEvent, TraceKind};

pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

/// 기본 그룹 id
pub const DEFAULT_GROUP: u32 = 1;

/// 단말 IP: 10.1.<상위 8비트>.<하위 8비트>
pub fn user_ip(user_id: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 1, (user_id >> 8) as u8, (user_id & 0xff) as u8))
}

// ----------------------------------------------------------------------------
// [Action] 예약 가능한 사용자 / 환경 동작
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    InitiateCall { user: u32, call_type: CallType, grp_id: u32 },
    /// PTT 누름 (사용자의 Active 호)
    Push { user: u32 },
    /// PTT 뗌
    Release { user: u32 },
    SetPriority { user: u32, priority: u8 },
    QueuePosition { user: u32 },
    ReleaseCall { user: u32 },
    /// 단말 이동 (미터 단위 평면 좌표)
    Move { user: u32, x: i32, y: i32 },
    /// 단말 링크 단절: 이후 오가는 패킷은 모두 유실
    LinkDown { user: u32 },
    LinkUp { user: u32 },
}

impl Action {
    pub fn user(&self) -> u32 {
        match self {
            Action::InitiateCall { user, .. }
            | Action::Push { user }
            | Action::Release { user }
            | Action::SetPriority { user, .. }
            | Action::QueuePosition { user }
            | Action::ReleaseCall { user }
            | Action::Move { user, .. }
            | Action::LinkDown { user }
            | Action::LinkUp { user } => *user,
        }
    }
}

// ----------------------------------------------------------------------------
// [EventQueue]
// ----------------------------------------------------------------------------

enum Event {
    Timer(TimerKey),
    Deliver { from: SocketAddr, to: SocketAddr, payload: Bytes },
    Action(Action),
}

struct Entry {
    at:     Millis,
    seq:    u64,
    handle: TimerHandle,
    event:  Event,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap은 최대 힙: 역순 비교로 가장 이른 사건이 먼저
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 결정적 사건 큐 (Scheduler 구현)
#[derive(Default)]
pub struct EventQueue {
    now:       Millis,
    seq:       u64,
    heap:      BinaryHeap<Entry>,
    cancelled: HashSet<TimerHandle>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, at: Millis, event: Event) -> TimerHandle {
        self.seq += 1;
        let handle = TimerHandle(self.seq);
        // 과거 시각은 현재로 당긴다
        self.heap.push(Entry { at: at.max(self.now), seq: self.seq, handle, event });
        handle
    }

    /// 취소된 사건은 건너뛰고 다음 사건을 꺼내 시각을 진행
    fn pop(&mut self) -> Option<Entry> {
        while let Some(entry) = self.heap.pop() {
            if self.cancelled.remove(&entry.handle) {
                continue;
            }
            self.now = entry.at;
            return Some(entry);
        }
        None
    }

    fn peek_time(&mut self) -> Option<Millis> {
        while let Some(entry) = self.heap.peek() {
            if self.cancelled.contains(&entry.handle) {
                let handle = entry.handle;
                self.heap.pop();
                self.cancelled.remove(&handle);
                continue;
            }
            return Some(entry.at);
        }
        None
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> Millis {
        self.now
    }

    fn schedule_at(&mut self, at: Millis, key: TimerKey) -> TimerHandle {
        self.push(at, Event::Timer(key))
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle);
    }
}

/// 핸들러가 보낸 데이터그램 임시 보관
#[derive(Default)]
struct Outbox {
    sent: Vec<(SocketAddr, SocketAddr, Bytes)>,
}

impl Transport for Outbox {
    fn send(&mut self, from: SocketAddr, to: SocketAddr, payload: Bytes) {
        self.sent.push((from, to, payload));
    }
}

// ----------------------------------------------------------------------------
// [Simulation]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub seed:       u64,
    /// 단방향 전송 지연
    pub latency_ms: Millis,
    pub floor:      FloorConfig,
    pub priorities: CallTypePriorities,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed:       1,
            latency_ms: 10,
            floor:      FloorConfig::default(),
            priorities: CallTypePriorities::default(),
        }
    }
}

pub struct Simulation {
    config:  SimConfig,
    queue:   EventQueue,
    server:  CallServer,
    clients: BTreeMap<u32, PttApp>,
    /// IP → user id
    nodes:   HashMap<IpAddr, u32>,
    down:    HashSet<IpAddr>,
    sink:    SharedSink,
}

impl Simulation {
    pub fn new(config: SimConfig, sink: SharedSink) -> McpttResult<Self> {
        let server = CallServer::new(IpAddr::V4(SERVER_IP), config.floor.clone(), config.priorities.clone())?;
        Ok(Self {
            config,
            queue: EventQueue::new(),
            server,
            clients: BTreeMap::new(),
            nodes: HashMap::new(),
            down: HashSet::new(),
            sink,
        })
    }

    /// 단말 추가 + 서버 그룹 등록
    pub fn add_user(&mut self, user_id: u32, grp_id: u32, config: ParticipantConfig, receive_only: bool) -> McpttResult<()> {
        if user_id == SERVER_NODE || user_id > u16::MAX as u32 {
            return Err(McpttError::ConfigurationError(format!("user id {} out of range 1..=65535", user_id)));
        }
        let ip = user_ip(user_id);
        self.server.add_member(grp_id, user_id, ip, receive_only);
        if !self.clients.contains_key(&user_id) {
            let app = PttApp::new(
                user_id,
                ip,
                self.server.ip(),
                config,
                self.config.priorities.clone(),
                self.config.seed ^ (user_id as u64).rotate_left(17),
            );
            self.clients.insert(user_id, app);
            self.nodes.insert(ip, user_id);
        }
        debug!("[sim] user={} ip={} grp={} receive_only={}", user_id, ip, grp_id, receive_only);
        Ok(())
    }

    pub fn schedule(&mut self, at: Millis, action: Action) {
        self.queue.push(at, Event::Action(action));
    }

    /// 임의 데이터그램 주입 (재전송 / 손상 패킷 흉내)
    pub fn inject(&mut self, at: Millis, from: SocketAddr, to: SocketAddr, payload: Bytes) {
        self.queue.push(at, Event::Deliver { from, to, payload });
    }

    pub fn now(&self) -> Millis {
        self.queue.now
    }

    pub fn server(&self) -> &CallServer {
        &self.server
    }

    pub fn client(&self, user_id: u32) -> Option<&PttApp> {
        self.clients.get(&user_id)
    }

    pub fn users(&self) -> Vec<u32> {
        self.clients.keys().copied().collect()
    }

    /// 사용자의 Active 호 floor 상태
    pub fn floor_state(&self, user_id: u32) -> Option<ParticipantState> {
        let app = self.clients.get(&user_id)?;
        app.floor_state(app.active_call()?)
    }

    /// 서버가 보는 현재 holder (이중 floor면 두 명)
    pub fn holders(&self, call_id: u16) -> Vec<u32> {
        let Some(call) = self.server.call(call_id) else { return Vec::new() };
        let arb = call.arbitrator();
        arb.holder().into_iter().chain(arb.second_holder()).map(|h| h.user_id).collect()
    }

    pub fn arbitrator_state(&self, call_id: u16) -> Option<ArbitratorState> {
        self.server.call(call_id).map(|c| c.arbitrator().state())
    }

    /// 사건 하나 처리. 큐가 비었으면 false
    pub fn step(&mut self) -> bool {
        let Some(entry) = self.queue.pop() else { return false };
        let mut out = Outbox::default();

        let (node, result) = {
            let mut ctx = Ctx::new(&mut self.queue, &mut out, &*self.sink);
            match entry.event {
                Event::Timer(key) => {
                    let result = if key.node == SERVER_NODE {
                        self.server.on_timer(&mut ctx, key, entry.handle)
                    } else {
                        match self.clients.get_mut(&key.node) {
                            Some(app) => app.on_timer(&mut ctx, key, entry.handle),
                            None => Err(McpttError::UnknownParticipant(key.node)),
                        }
                    };
                    (key.node, result)
                }
                Event::Deliver { from, to, payload } => {
                    if self.down.contains(&from.ip()) || self.down.contains(&to.ip()) {
                        trace!("[sim] drop {} -> {} (link down)", from, to);
                        return true;
                    }
                    if to.ip() == self.server.ip() {
                        (SERVER_NODE, self.server.on_receive(&mut ctx, from, to, &payload))
                    } else {
                        match self.nodes.get(&to.ip()).and_then(|u| self.clients.get_mut(u)) {
                            Some(app) => (app.user_id(), app.on_receive(&mut ctx, to, &payload)),
                            None => {
                                warn!("[sim] no node at {}", to);
                                return true;
                            }
                        }
                    }
                }
                Event::Action(action) => {
                    let user = action.user();
                    (user, perform(&mut ctx, &mut self.clients, &mut self.down, action))
                }
            }
        };

        if let Err(e) = result {
            self.report(node, e);
        }
        self.flush(out);
        true
    }

    /// 시각 `until`까지의 사건을 모두 처리
    pub fn run_until(&mut self, until: Millis) {
        while matches!(self.queue.peek_time(), Some(at) if at <= until) {
            self.step();
        }
        self.queue.now = self.queue.now.max(until);
    }

    /// 큐가 빌 때까지 (T4 이후 호가 정리되면 끝난다)
    pub fn run(&mut self) {
        while self.step() {}
    }

    fn flush(&mut self, out: Outbox) {
        let at = self.queue.now + self.config.latency_ms;
        for (from, to, payload) in out.sent {
            self.queue.push(at, Event::Deliver { from, to, payload });
        }
    }

    fn report(&self, node: u32, err: McpttError) {
        match &err {
            McpttError::DeliveryFailure { .. } | McpttError::ConfigurationError(_) => {
                warn!("[sim] node={} {}", node, err)
            }
            _ => debug!("[sim] node={} {}", node, err),
        }
        self.sink.publish(TraceEvent::new(self.queue.now, TraceDir::Sys, node, 0, 0, TraceKind::Error {
            reason: err.to_string(),
        }));
    }
}

fn perform(
    ctx:     &mut Ctx<'_>,
    clients: &mut BTreeMap<u32, PttApp>,
    down:    &mut HashSet<IpAddr>,
    action:  Action,
) -> McpttResult<()> {
    let user = action.user();
    let app = clients.get_mut(&user).ok_or(McpttError::UnknownParticipant(user))?;
    match action {
        Action::InitiateCall { call_type, grp_id, .. } => app.initiate_call(ctx, call_type, grp_id).map(|_| ()),
        Action::Push { .. } => {
            let call_id = active_call(app)?;
            app.push(ctx, call_id)
        }
        Action::Release { .. } => {
            let call_id = active_call(app)?;
            app.release(ctx, call_id)
        }
        Action::SetPriority { priority, .. } => {
            let call_id = active_call(app)?;
            app.set_priority(call_id, priority)
        }
        Action::QueuePosition { .. } => {
            let call_id = active_call(app)?;
            app.request_queue_position(ctx, call_id)
        }
        Action::ReleaseCall { .. } => {
            let call_id = active_call(app)?;
            app.release_call(ctx, call_id)
        }
        Action::Move { x, y, .. } => {
            app.set_location(ctx, UserLoc::new(f64::from(x), f64::from(y), 0.0));
            Ok(())
        }
        Action::LinkDown { .. } => {
            info!("[sim] user={} link down", user);
            down.insert(app.ip());
            Ok(())
        }
        Action::LinkUp { .. } => {
            info!("[sim] user={} link up", user);
            down.remove(&app.ip());
            Ok(())
        }
    }
}

fn active_call(app: &PttApp) -> McpttResult<u16> {
    app.active_call().ok_or_else(|| {
        debug!("[sim] user={} has no active call", app.user_id());
        McpttError::InvalidTransition { state: "Null", message: "PushToTalk" }
    })
}

// ----------------------------------------------------------------------------
// [Plan] 내장 시나리오 / 랜덤 경합
// ----------------------------------------------------------------------------

/// 사용자 구성과 동작 예약표
#[derive(Debug, Clone)]
pub struct Plan {
    /// FloorConfig 평면 속성
    pub attributes:  Vec<(String, String)>,
    pub participant: ParticipantConfig,
    pub users:       Vec<u32>,
    pub actions:     Vec<(Millis, Action)>,
    /// 이 시각까지 실행
    pub duration:    Millis,
}

impl Plan {
    /// 시뮬레이션 생성: `extra` 속성이 시나리오 속성을 덮어쓴다
    pub fn build(&self, seed: u64, extra: &[(String, String)], sink: SharedSink) -> McpttResult<Simulation> {
        let pairs: Vec<(String, String)> = self.attributes.iter().chain(extra).cloned().collect();
        let config = SimConfig {
            seed,
            floor: FloorConfig::from_attributes(&pairs)?,
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(config, sink)?;
        for user in &self.users {
            sim.add_user(*user, DEFAULT_GROUP, self.participant.clone(), false)?;
        }
        for (at, action) in &self.actions {
            sim.schedule(*at, action.clone());
        }
        Ok(sim)
    }

    /// 사용자마다 누름 / 뗌을 무작위로 반복하는 경합 시나리오
    pub fn random(users: u32, seed: u64, duration_secs: u64) -> McpttResult<Self> {
        Self::contention(users, seed, duration_secs, false)
    }

    /// `random` + 누르기 전 우선순위(1..=3) 무작위 변경, audio cut-in 켜짐
    pub fn random_mixed(users: u32, seed: u64, duration_secs: u64) -> McpttResult<Self> {
        Self::contention(users, seed, duration_secs, true)
    }

    fn contention(users: u32, seed: u64, duration_secs: u64, mixed: bool) -> McpttResult<Self> {
        if !(2..=u16::MAX as u32).contains(&users) {
            return Err(McpttError::ConfigurationError(format!("users {} out of range 2..=65535", users)));
        }
        let duration = duration_secs.saturating_mul(1_000);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut actions = vec![(1_000, Action::InitiateCall { user: 1, call_type: CallType::BasicGroup, grp_id: DEFAULT_GROUP })];

        for user in 1..=users {
            let mut t = 3_000 + rng.gen_range(0..2_000);
            while t < duration {
                let hold = rng.gen_range(500..4_000);
                if mixed {
                    let priority = rng.gen_range(1..=3);
                    actions.push((t.saturating_sub(100), Action::SetPriority { user, priority }));
                    // 말하는 중 우선순위만 바꾸는 경우 (다음 Request에 반영)
                    if rng.gen_bool(0.3) {
                        let priority = rng.gen_range(1..=3);
                        actions.push((t + hold / 2, Action::SetPriority { user, priority }));
                    }
                }
                actions.push((t, Action::Push { user }));
                actions.push((t + hold, Action::Release { user }));
                t += hold + rng.gen_range(1_000..8_000);
            }
        }
        actions.push((duration, Action::ReleaseCall { user: 1 }));
        actions.sort_by_key(|(at, _)| *at);

        let mut attributes = vec![("QueueingSupported".to_string(), "true".to_string())];
        if mixed {
            attributes.push(("AudioCutIn".into(), "true".into()));
        }
        Ok(Self {
            attributes,
            participant: ParticipantConfig::default(),
            users:       (1..=users).collect(),
            actions,
            duration:    duration + 5_000,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// 기본 해제
    A,
    /// 해제 후 다른 참가자 grant
    B,
    /// 우선순위 Revoke (audio cut-in)
    C,
    /// 대기열 없는 Deny
    D,
    /// 이중 floor
    E,
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Scenario::A),
            "b" => Ok(Scenario::B),
            "c" => Ok(Scenario::C),
            "d" => Ok(Scenario::D),
            "e" => Ok(Scenario::E),
            _ => Err(format!("unknown scenario '{}' (expected a..e)", s)),
        }
    }
}

fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [Scenario::A, Scenario::B, Scenario::C, Scenario::D, Scenario::E];

    pub fn attributes(self) -> Vec<(String, String)> {
        match self {
            Scenario::A | Scenario::B => attrs(&[("AckRequired", "true"), ("AudioCutIn", "false")]),
            Scenario::C => attrs(&[("AudioCutIn", "true")]),
            Scenario::D => attrs(&[("QueueingSupported", "false")]),
            Scenario::E => attrs(&[("DualFloorSupported", "true"), ("QueueingSupported", "false")]),
        }
    }

    pub fn plan(self) -> Plan {
        use Action::*;
        let call = (1_000, InitiateCall { user: 1, call_type: CallType::BasicGroup, grp_id: DEFAULT_GROUP });
        let (users, actions): (Vec<u32>, Vec<(Millis, Action)>) = match self {
            Scenario::A => (vec![1, 2], vec![call, (3_000, Push { user: 1 }), (4_000, Release { user: 1 })]),
            Scenario::B => (vec![1, 2], vec![
                call,
                (3_000, Push { user: 1 }),
                (4_000, Release { user: 1 }),
                (6_000, Push { user: 2 }),
            ]),
            Scenario::C => (vec![1, 2], vec![
                call,
                (3_000, Push { user: 1 }),
                (4_000, SetPriority { user: 2, priority: 2 }),
                (5_000, Push { user: 2 }),
            ]),
            Scenario::D => (vec![1, 2], vec![call, (3_000, Push { user: 1 }), (4_000, Push { user: 2 })]),
            Scenario::E => (vec![1, 2, 3], vec![
                call,
                (3_000, Push { user: 1 }),
                (4_000, Push { user: 2 }),
                (5_000, SetPriority { user: 3, priority: 2 }),
                (6_000, Push { user: 3 }),
                (8_000, Release { user: 1 }),
                (10_000, Release { user: 3 }),
            ]),
        };
        Plan {
            attributes: self.attributes(),
            participant: ParticipantConfig {
                ack_required: matches!(self, Scenario::A | Scenario::B),
                ..ParticipantConfig::default()
            },
            users,
            actions,
            duration: 12_000,
        }
    }
}

// ----------------------------------------------------------------------------
// [testing] 단위 테스트용 가짜 스케줄러 / 전송
// ----------------------------------------------------------------------------

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::core::timer::TimerId;
    use crate::trace::TraceLog;

    #[derive(Default)]
    pub struct FakeScheduler {
        now:       Millis,
        next:      u64,
        scheduled: Vec<(Millis, TimerKey, TimerHandle)>,
        cancelled: Vec<TimerHandle>,
    }

    impl Scheduler for FakeScheduler {
        fn now(&self) -> Millis {
            self.now
        }

        fn schedule_at(&mut self, at: Millis, key: TimerKey) -> TimerHandle {
            self.next += 1;
            let handle = TimerHandle(self.next);
            self.scheduled.push((at, key, handle));
            handle
        }

        fn cancel(&mut self, handle: TimerHandle) {
            self.cancelled.push(handle);
        }
    }

    #[derive(Default)]
    pub struct Recorder {
        sent: Vec<(SocketAddr, SocketAddr, Bytes)>,
    }

    impl Transport for Recorder {
        fn send(&mut self, from: SocketAddr, to: SocketAddr, payload: Bytes) {
            self.sent.push((from, to, payload));
        }
    }

    /// 상태머신 하나를 직접 구동하는 테스트 하네스
    pub struct Harness {
        pub sched: FakeScheduler,
        pub net:   Recorder,
        pub log:   Arc<TraceLog>,
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Harness {
        pub fn new() -> Self {
            Self { sched: FakeScheduler::default(), net: Recorder::default(), log: TraceLog::new() }
        }

        pub fn ctx(&mut self) -> Ctx<'_> {
            Ctx::new(&mut self.sched, &mut self.net, &*self.log)
        }

        pub fn sent(&self) -> &[(SocketAddr, SocketAddr, Bytes)] {
            &self.net.sent
        }

        pub fn clear_sent(&mut self) {
            self.net.sent.clear();
        }

        /// cancel 호출 횟수
        pub fn cancelled(&self) -> usize {
            self.sched.cancelled.len()
        }

        pub fn last_handle(&self) -> TimerHandle {
            TimerHandle(self.sched.next)
        }

        /// 해당 종류의 가장 최근 살아있는 타이머를 꺼낸다 (만료 흉내)
        pub fn timer(&mut self, id: TimerId) -> Option<(TimerKey, TimerHandle)> {
            let cancelled = &self.sched.cancelled;
            let idx = self.sched.scheduled.iter()
                .rposition(|(_, key, handle)| key.id == id && !cancelled.contains(handle))?;
            let (at, key, handle) = self.sched.scheduled.remove(idx);
            self.sched.now = self.sched.now.max(at);
            Some((key, handle))
        }

        pub fn advance(&mut self, ms: Millis) {
            self.sched.now += ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timer::{TimerId, TimerOwner};
    use crate::trace::TraceLog;

    #[test]
    fn queue_is_fifo_at_equal_time() {
        let mut q = EventQueue::new();
        let key = |call_id| TimerKey::new(SERVER_NODE, call_id, TimerOwner::Arbitrator, TimerId::T2);
        q.schedule_at(500, key(1));
        q.schedule_at(100, key(2));
        q.schedule_at(500, key(3));
        let order: Vec<u16> = std::iter::from_fn(|| q.pop())
            .map(|e| match e.event {
                Event::Timer(k) => k.call_id,
                _ => 0,
            })
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(q.now(), 500);
    }

    #[test]
    fn cancelled_event_never_fires() {
        let mut q = EventQueue::new();
        let key = TimerKey::new(SERVER_NODE, 1, TimerOwner::Arbitrator, TimerId::T4);
        let h = q.schedule_at(100, key);
        q.schedule_at(200, key);
        q.cancel(h);
        assert_eq!(q.peek_time(), Some(200));
        assert_eq!(q.pop().map(|e| e.at), Some(200));
        assert!(q.pop().is_none());
    }

    #[test]
    fn user_id_out_of_range_rejected() {
        let mut sim = Simulation::new(SimConfig::default(), TraceLog::new()).unwrap();
        assert!(sim.add_user(0, 1, ParticipantConfig::default(), false).is_err());
        assert!(sim.add_user(70_000, 1, ParticipantConfig::default(), false).is_err());
        assert_eq!(user_ip(258), "10.1.1.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn call_setup_over_loopback() {
        let mut sim = Simulation::new(SimConfig::default(), TraceLog::new()).unwrap();
        for user in 1..=3 {
            sim.add_user(user, 1, ParticipantConfig::default(), false).unwrap();
        }
        sim.schedule(1_000, Action::InitiateCall { user: 1, call_type: CallType::BasicGroup, grp_id: 1 });
        sim.run_until(2_000);
        let call_id = sim.client(1).and_then(|c| c.active_call()).unwrap();
        assert_eq!(sim.server().call(call_id).unwrap().members().len(), 3);
        for user in 1..=3 {
            assert_eq!(sim.floor_state(user), Some(ParticipantState::NoPermission));
        }
        assert_eq!(sim.now(), 2_000);
    }

    #[test]
    fn push_without_call_reports_error() {
        let log = TraceLog::new();
        let mut sim = Simulation::new(SimConfig::default(), log.clone()).unwrap();
        sim.add_user(1, 1, ParticipantConfig::default(), false).unwrap();
        sim.schedule(10, Action::Push { user: 1 });
        sim.run();
        assert!(log.events().iter().any(|e| matches!(e.kind, TraceKind::Error { .. })));
    }

    #[test]
    fn scenario_names_parse() {
        assert_eq!("c".parse::<Scenario>().unwrap(), Scenario::C);
        assert_eq!("E".parse::<Scenario>().unwrap(), Scenario::E);
        assert!("z".parse::<Scenario>().is_err());
    }

    #[test]
    fn random_plan_is_seeded() {
        let a = Plan::random(4, 7, 30).unwrap();
        let b = Plan::random(4, 7, 30).unwrap();
        assert_eq!(a.actions, b.actions);
        assert!(a.actions.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(Plan::random(1, 7, 30).is_err());
    }
}
