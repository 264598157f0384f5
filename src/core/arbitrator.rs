// author: kodeholic (powered by Claude)
// FloorArbitrator: 호당 1개, "누가 말할 수 있는가"의 유일한 결정자
//
// 상태머신:
//   Idle          → Request               → Taken (Granted→요청자, Taken→나머지)
//   Taken         → Release(holder)       → Taken(대기열 선두) 또는 Idle
//   Taken         → Request(preemptive)   → DualTaken (이중 floor 지원 시)
//   Taken         → Request(preemptive)   → PendingRevoke (audio cut-in: 선점자 대기열 삽입, Revoke→holder)
//   PendingRevoke → Request               → 대기열 삽입 (거부하지 않음)
//   PendingRevoke → Release / T3 만료     → Taken(대기열 선두)
//   Taken         → T1 만료 (holder 침묵) → Taken(대기열 선두) 또는 Idle
//   DualTaken     → Release(second)       → Taken (Idle/Taken→main holder 외 전원)
//   DualTaken     → Release(main)         → Taken (second가 main이 됨)
//   Taken         → T2 만료               → PendingRevoke (cause 2)
//   Idle          → T4 만료               → 호 해제 신호
//
// 같은 시각에 도착한 요청은 처리 순서대로 판단한다 (먼저 처리된 쪽이 grant).
//
// 미디어: holder(또는 이중 floor의 second)가 보낸 패킷만 나머지 전원에게 중계,
// holder 패킷마다 T1 재시작.

use std::net::SocketAddr;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::config::FloorConfig;
use crate::core::call::CallTraits;
use crate::core::queue::{is_preemptive, FloorIndicator, FloorQueue, FloorQueueEntry};
use crate::core::timer::{Ctx, Timer, TimerHandle, TimerId, TimerKey, TimerOwner, SERVER_NODE};
use crate::core::towards::TowardsParticipant;
use crate::error::{McpttError, McpttResult};
use crate::protocol::{FloorBody, FloorMessage, Indicator, MediaMessage, RejectCause, UserLoc};
use crate::trace::{TraceDir, TraceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArbitratorState {
    Idle,
    Taken,
    /// holder에게 Revoke 송신, Release 대기
    PendingRevoke,
    /// 두 holder 동시 발언
    DualTaken,
}

impl ArbitratorState {
    pub fn name(self) -> &'static str {
        match self {
            ArbitratorState::Idle          => "Idle",
            ArbitratorState::Taken         => "Taken",
            ArbitratorState::PendingRevoke => "PendingRevoke",
            ArbitratorState::DualTaken     => "DualTaken",
        }
    }
}

/// 발언권 보유자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub user_id:   u32,
    pub priority:  u8,
    pub indicator: FloorIndicator,
}

/// 타이머 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Handled,
    /// T4 만료: 호를 해제해야 함
    Inactive,
}

pub struct FloorArbitrator {
    call_id:      u16,
    traits:       CallTraits,
    config:       FloorConfig,
    state:        ArbitratorState,
    holder:       Option<Holder>,
    /// 이중 floor의 두 번째 holder
    second:       Option<Holder>,
    queue:        FloorQueue,
    /// 참가 순서 유지: 브로드캐스트 순서가 결정적
    participants: Vec<TowardsParticipant>,
    seq_num:      u16,
    t1:           Timer,
    t2:           Timer,
    t3:           Timer,
    t4:           Timer,
    t12:          Timer,
}

impl FloorArbitrator {
    pub fn new(call_id: u16, traits: CallTraits, config: FloorConfig) -> Self {
        let key = |id| TimerKey::new(SERVER_NODE, call_id, TimerOwner::Arbitrator, id);
        Self {
            call_id,
            traits,
            state:        ArbitratorState::Idle,
            holder:       None,
            second:       None,
            queue:        FloorQueue::new(config.queue_capacity),
            participants: Vec::new(),
            seq_num:      0,
            t1:           Timer::new(key(TimerId::T1), config.t1_ms),
            t2:           Timer::new(key(TimerId::T2), config.t2_ms),
            t3:           Timer::new(key(TimerId::T3), config.t3_ms),
            t4:           Timer::new(key(TimerId::T4), config.t4_ms),
            t12:          Timer::new(key(TimerId::T12), config.t12_ms),
            config,
        }
    }

    // ------------------------------------------------------------------------
    // 조회
    // ------------------------------------------------------------------------

    pub fn call_id(&self) -> u16 {
        self.call_id
    }

    pub fn state(&self) -> ArbitratorState {
        self.state
    }

    pub fn holder(&self) -> Option<Holder> {
        self.holder
    }

    pub fn second_holder(&self) -> Option<Holder> {
        self.second
    }

    pub fn queue(&self) -> &FloorQueue {
        &self.queue
    }

    pub fn participants(&self) -> &[TowardsParticipant] {
        &self.participants
    }

    pub fn participant(&self, user_id: u32) -> Option<&TowardsParticipant> {
        self.participants.iter().find(|p| p.user_id() == user_id)
    }

    fn index_of(&self, user_id: u32) -> Option<usize> {
        self.participants.iter().position(|p| p.user_id() == user_id)
    }

    fn is_holder(&self, user_id: u32) -> bool {
        self.holder.map(|h| h.user_id) == Some(user_id)
    }

    fn is_second(&self, user_id: u32) -> bool {
        self.second.map(|h| h.user_id) == Some(user_id)
    }

    // ------------------------------------------------------------------------
    // 참가자 관리
    // ------------------------------------------------------------------------

    /// 같은 user가 이미 있으면 교체
    pub fn add_participant(&mut self, participant: TowardsParticipant) {
        match self.index_of(participant.user_id()) {
            Some(i) => self.participants[i] = participant,
            None    => self.participants.push(participant),
        }
    }

    /// 호 이탈: 대기열에서 제거, holder였으면 Release와 같게 처리
    pub fn leave(&mut self, ctx: &mut Ctx<'_>, user_id: u32) -> McpttResult<()> {
        let Some(i) = self.index_of(user_id) else {
            return Err(McpttError::UnknownParticipant(user_id));
        };
        self.queue.remove(user_id);

        let mut gone = self.participants.remove(i);
        gone.cancel_all(ctx);

        if self.is_second(user_id) {
            self.release_second(ctx, "Leave");
        } else if self.is_holder(user_id) {
            match self.state {
                ArbitratorState::DualTaken => self.release_main_in_dual(ctx, "Leave"),
                _ => self.hand_over(ctx, "Leave", None),
            }
        }
        info!("[arbitrator] call={} user={} left", self.call_id, user_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 수명
    // ------------------------------------------------------------------------

    /// 호 활성화: Idle을 전원에게 알리고 T4 시작
    pub fn start(&mut self, ctx: &mut Ctx<'_>) {
        self.enter_idle(ctx, "CallActive", None);
    }

    /// 호 해제: 모든 타이머 정리
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        for timer in [&mut self.t1, &mut self.t2, &mut self.t3, &mut self.t4, &mut self.t12] {
            timer.stop(ctx);
        }
        for p in &mut self.participants {
            p.cancel_all(ctx);
        }
        self.queue.clear();
        self.holder = None;
        self.second = None;
    }

    /// 위치 보고 반영 (다음 grant 트레이스부터 사용)
    pub fn set_location(&mut self, user_id: u32, location: UserLoc) -> McpttResult<()> {
        let i = self.index_of(user_id).ok_or(McpttError::UnknownParticipant(user_id))?;
        self.participants[i].set_location(location);
        debug!("[arbitrator] call={} user={} location {}", self.call_id, user_id, format_loc(location));
        Ok(())
    }

    /// 미디어 수신: 발언권자의 패킷만 나머지 참가자에게 중계
    pub fn receive_media(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, msg: MediaMessage, payload: Bytes) -> McpttResult<()> {
        let i = self.participants.iter().position(|p| p.media_addr() == from)
            .ok_or(McpttError::UnknownParticipant(0))?;
        let user_id = self.participants[i].user_id();
        ctx.emit(TraceDir::In, SERVER_NODE, self.call_id, user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });

        let talking = matches!(
            self.state,
            ArbitratorState::Taken | ArbitratorState::PendingRevoke | ArbitratorState::DualTaken
        );
        if !talking || !(self.is_holder(user_id) || self.is_second(user_id)) {
            trace!("[arbitrator] call={} media from user={} dropped (no permission)", self.call_id, user_id);
            return Ok(());
        }

        if self.is_holder(user_id) {
            self.t1.start(ctx);
            if self.state == ArbitratorState::Taken && !self.t2.is_running() {
                self.t2.start(ctx);
            }
        }
        for p in self.participants.iter_mut().filter(|p| p.user_id() != user_id) {
            p.forward_media(ctx, &msg, payload.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 수신
    // ------------------------------------------------------------------------

    /// 송신자는 floor 메시지의 출발지 주소로 식별한다
    pub fn receive(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, msg: FloorMessage) -> McpttResult<()> {
        let i = self.participants.iter().position(|p| p.addr() == from)
            .ok_or_else(|| McpttError::UnknownParticipant(body_user(&msg.body)))?;
        let user_id = self.participants[i].user_id();

        ctx.emit(TraceDir::In, SERVER_NODE, self.call_id, user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        trace!("[arbitrator] <- user={} {}", user_id, msg.summary());

        self.participants[i].observe_ssrc(msg.ssrc);
        if msg.ack_requested {
            self.participants[i].send_ack(ctx, msg.kind());
        }

        match msg.body {
            FloorBody::Request { priority, indicator, .. } => {
                self.participants[i].set_priority(priority);
                let requester = Holder { user_id, priority, indicator: FloorIndicator::from_bits(indicator) };
                self.on_request(ctx, requester);
                Ok(())
            }
            FloorBody::Release { .. } => {
                self.on_release(ctx, user_id, msg.ack_requested);
                Ok(())
            }
            FloorBody::QueuePositionRequest { .. } => {
                self.send_queue_position(ctx, user_id);
                Ok(())
            }
            FloorBody::Ack { acked, .. } => {
                self.participants[i].on_ack(ctx, acked);
                Ok(())
            }
            _ => Err(McpttError::InvalidTransition { state: self.state.name(), message: msg.name() }),
        }
    }

    fn on_request(&mut self, ctx: &mut Ctx<'_>, req: Holder) {
        match self.state {
            ArbitratorState::Idle => {
                if self.participants.len() <= 1 {
                    self.deny(ctx, req.user_id, RejectCause::OnlyOneParticipant);
                } else if !self.may_talk(req.user_id) {
                    self.deny(ctx, req.user_id, RejectCause::ReceiveOnly);
                } else {
                    self.grant(ctx, req, "FloorRequest");
                }
            }
            _ => self.on_request_taken(ctx, req),
        }
    }

    fn on_request_taken(&mut self, ctx: &mut Ctx<'_>, req: Holder) {
        // 이미 발언 중인 참가자의 재요청, Granted 재전송
        if self.is_holder(req.user_id) || self.is_second(req.user_id) {
            let dual = self.is_second(req.user_id);
            self.send_granted(ctx, req.user_id, dual);
            return;
        }
        if !self.may_talk(req.user_id) {
            self.deny(ctx, req.user_id, RejectCause::ReceiveOnly);
            return;
        }
        if self.queue.contains(req.user_id) {
            if self.config.queueing_supported {
                self.send_queue_position(ctx, req.user_id);
            }
            return;
        }

        let preemptive = self.holder
            .map(|h| is_preemptive(req.priority, req.indicator, h.priority, h.indicator))
            .unwrap_or(false);

        match self.state {
            ArbitratorState::Taken if preemptive => {
                if self.config.dual_floor_supported && self.second.is_none() {
                    self.enter_dual(ctx, req);
                    return;
                }
                if self.config.audio_cut_in {
                    self.cut_in(ctx, req);
                    return;
                }
            }
            // Revoke 진행 중: 선점 요청은 큐 설정과 무관하게 줄을 선다
            ArbitratorState::PendingRevoke if preemptive || self.config.queueing_supported => {
                self.queue_request(ctx, req);
                return;
            }
            _ => {}
        }

        if self.config.queueing_supported {
            self.queue_request(ctx, req);
        } else {
            self.deny(ctx, req.user_id, RejectCause::AnotherClientHasPermission);
        }
    }

    /// audio cut-in: 요청자를 대기열에 넣고 holder에게 Revoke
    fn cut_in(&mut self, ctx: &mut Ctx<'_>, req: Holder) {
        let Some(h) = self.holder else { return };
        if !self.queue_request(ctx, req) {
            return;
        }
        self.t1.stop(ctx);
        info!("[arbitrator] call={} user={} preempts holder={}", self.call_id, req.user_id, h.user_id);
        self.revoke(ctx, RejectCause::RetryAfterTimer, "FloorRequest");
    }

    /// 대기열 삽입, 꽉 차 있으면 Deny 후 false
    ///
    /// Queue Position Info는 큐를 지원하는 호에서만 보낸다.
    fn queue_request(&mut self, ctx: &mut Ctx<'_>, req: Holder) -> bool {
        let entry = FloorQueueEntry {
            user_id:   req.user_id,
            ssrc:      self.participant(req.user_id).map(|p| p.member().ssrc).unwrap_or(0),
            priority:  req.priority,
            indicator: req.indicator,
            queued_at: ctx.now(),
        };
        match self.queue.enqueue(entry) {
            Some(pos) => {
                debug!("[arbitrator] call={} user={} queued at {}", self.call_id, req.user_id, pos);
                if self.config.queueing_supported {
                    self.send_queue_position(ctx, req.user_id);
                }
                true
            }
            None => {
                self.deny(ctx, req.user_id, RejectCause::QueueFull);
                false
            }
        }
    }

    /// 수신 전용 참가자, 방송 호의 비발신자는 발언 불가
    fn may_talk(&self, user_id: u32) -> bool {
        match self.participant(user_id) {
            Some(p) => !p.receive_only() && (!self.traits.broadcast || p.originator()),
            None    => false,
        }
    }

    fn on_release(&mut self, ctx: &mut Ctx<'_>, user_id: u32, ack_requested: bool) {
        if self.is_second(user_id) {
            self.release_second(ctx, "FloorRelease");
            return;
        }
        if self.is_holder(user_id) {
            self.release_holder_towards(ctx, user_id, "FloorRelease");
            match self.state {
                ArbitratorState::DualTaken => self.release_main_in_dual(ctx, "FloorRelease"),
                // ACK가 Release를 확인해 주므로 Idle은 나머지에게만
                _ => self.hand_over(ctx, "FloorRelease", ack_requested.then_some(user_id)),
            }
            return;
        }

        // 발언권 없는 참가자의 Release, 대기 취소
        if self.queue.remove(user_id).is_some() {
            debug!("[arbitrator] call={} user={} withdrew request", self.call_id, user_id);
            match self.holder {
                Some(h) => self.send_taken_to(ctx, user_id, h),
                None    => self.send_idle_to(ctx, user_id),
            }
            return;
        }

        debug!("[arbitrator] call={} release from non-holder user={} ignored", self.call_id, user_id);
    }

    // ------------------------------------------------------------------------
    // 타이머
    // ------------------------------------------------------------------------

    pub fn on_timer(&mut self, ctx: &mut Ctx<'_>, key: TimerKey, handle: TimerHandle) -> McpttResult<TimerOutcome> {
        match (key.owner, key.id) {
            (TimerOwner::Towards(user_id), TimerId::AckRetry(kind)) => {
                let i = self.index_of(user_id).ok_or(McpttError::UnknownParticipant(user_id))?;
                self.participants[i].on_retry_timer(ctx, kind, handle)?;
            }
            (TimerOwner::Arbitrator, TimerId::T1) if self.t1.expire(handle) => self.on_t1(ctx),
            (TimerOwner::Arbitrator, TimerId::T2) if self.t2.expire(handle) => self.on_t2(ctx),
            (TimerOwner::Arbitrator, TimerId::T3) if self.t3.expire(handle) => {
                // Release 없이 유예 만료, 강제로 넘긴다
                if let Some(h) = self.holder {
                    info!("[arbitrator] call={} T3 expired, holder={} forced off", self.call_id, h.user_id);
                    self.release_holder_towards(ctx, h.user_id, "T3");
                }
                self.hand_over(ctx, "T3", None);
            }
            (TimerOwner::Arbitrator, TimerId::T4) if self.t4.expire(handle) => {
                info!("[arbitrator] call={} idle timeout", self.call_id);
                return Ok(TimerOutcome::Inactive);
            }
            (TimerOwner::Arbitrator, TimerId::T12) if self.t12.expire(handle) => {
                if let Some(s) = self.second {
                    self.send_to(ctx, s.user_id, FloorBody::Revoke {
                        cause:     RejectCause::InternalError,
                        indicator: s.indicator.to_bits().with(Indicator::DUAL_FLOOR),
                    });
                    self.release_second(ctx, "T12");
                }
            }
            _ => trace!("[arbitrator] call={} stale timer {:?}", self.call_id, key.id),
        }
        Ok(TimerOutcome::Handled)
    }

    /// holder 미디어 끊김: 발언 종료로 본다
    fn on_t1(&mut self, ctx: &mut Ctx<'_>) {
        let Some(h) = self.holder else { return };
        info!("[arbitrator] call={} T1 expired, holder={} silent", self.call_id, h.user_id);
        self.release_holder_towards(ctx, h.user_id, "T1");
        match self.state {
            ArbitratorState::DualTaken => self.release_main_in_dual(ctx, "T1"),
            ArbitratorState::Taken | ArbitratorState::PendingRevoke => self.hand_over(ctx, "T1", None),
            ArbitratorState::Idle => {}
        }
    }

    /// 최대 발언 시간 초과
    fn on_t2(&mut self, ctx: &mut Ctx<'_>) {
        let Some(h) = self.holder else { return };
        info!("[arbitrator] call={} T2 expired, revoking user={}", self.call_id, h.user_id);
        match self.state {
            ArbitratorState::Taken => self.revoke(ctx, RejectCause::InternalError, "T2"),
            ArbitratorState::DualTaken => {
                self.send_to(ctx, h.user_id, FloorBody::Revoke {
                    cause:     RejectCause::InternalError,
                    indicator: h.indicator.to_bits(),
                });
                self.release_holder_towards(ctx, h.user_id, "T2");
                self.release_main_in_dual(ctx, "T2");
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // 전이
    // ------------------------------------------------------------------------

    fn set_state(&mut self, ctx: &mut Ctx<'_>, new: ArbitratorState, trigger: &'static str) {
        if self.state == new {
            return;
        }
        let old = std::mem::replace(&mut self.state, new);
        let user_id = self.holder.map(|h| h.user_id).unwrap_or(0);
        ctx.emit(TraceDir::Sys, SERVER_NODE, self.call_id, user_id, TraceKind::StateChange {
            machine: "arbitrator",
            old:     old.name(),
            new:     new.name(),
            trigger,
        });
        debug!("[arbitrator] call={} {} -> {} ({})", self.call_id, old.name(), new.name(), trigger);
    }

    fn grant(&mut self, ctx: &mut Ctx<'_>, next: Holder, trigger: &'static str) {
        self.t3.stop(ctx);
        self.t4.stop(ctx);
        self.holder = Some(next);
        self.set_state(ctx, ArbitratorState::Taken, trigger);

        self.trace_talker(ctx, next.user_id);
        self.send_granted(ctx, next.user_id, false);
        self.seq_num = self.seq_num.wrapping_add(1);
        self.broadcast_taken(ctx, next, &[next.user_id]);
        self.t1.start(ctx);
        self.t2.start(ctx);
    }

    /// 발언권자와 위치를 floor 트레이스에 남긴다
    fn trace_talker(&self, ctx: &mut Ctx<'_>, user_id: u32) {
        let Some(p) = self.participant(user_id) else { return };
        let loc = format_loc(p.member().location);
        info!("[arbitrator] call={} talker user={} loc={}", self.call_id, user_id, loc);
        ctx.emit(TraceDir::Sys, SERVER_NODE, self.call_id, user_id, TraceKind::Message {
            name:   "Talker",
            header: format!("Talker user={} prio={} loc={}", user_id, p.member().priority, loc),
        });
    }

    /// holder가 빠진 뒤: 대기열 선두(선점자 포함) → Idle 순
    fn hand_over(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str, skip_idle: Option<u32>) {
        self.holder = None;
        self.enter_idle(ctx, trigger, skip_idle);
    }

    fn enter_idle(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str, skip: Option<u32>) {
        for timer in [&mut self.t1, &mut self.t2, &mut self.t3, &mut self.t12] {
            timer.stop(ctx);
        }
        self.holder = None;

        if let Some(next) = self.queue.dequeue_next() {
            // 큐 미지원 호에서 대기열은 선점 요청의 임시 보관용, 남은 요청은 거부
            if !self.config.queueing_supported {
                while let Some(rest) = self.queue.dequeue_next() {
                    self.deny(ctx, rest.user_id, RejectCause::AnotherClientHasPermission);
                }
            }
            let next = Holder { user_id: next.user_id, priority: next.priority, indicator: next.indicator };
            self.grant(ctx, next, trigger);
            return;
        }

        self.set_state(ctx, ArbitratorState::Idle, trigger);
        self.seq_num = self.seq_num.wrapping_add(1);
        let except: Vec<u32> = skip.into_iter().collect();
        for user_id in self.others(&except) {
            self.send_idle_to(ctx, user_id);
        }
        self.t4.start(ctx);
    }

    fn revoke(&mut self, ctx: &mut Ctx<'_>, cause: RejectCause, trigger: &'static str) {
        let Some(h) = self.holder else { return };
        self.t2.stop(ctx);
        self.set_state(ctx, ArbitratorState::PendingRevoke, trigger);
        self.send_to(ctx, h.user_id, FloorBody::Revoke { cause, indicator: h.indicator.to_bits() });
        // audio cut-in 호는 Release를 기다리지 않는다
        if self.config.audio_cut_in {
            self.t3.start_with(ctx, 0);
        } else {
            self.t3.start(ctx);
        }
    }

    fn enter_dual(&mut self, ctx: &mut Ctx<'_>, req: Holder) {
        self.second = Some(req);
        self.set_state(ctx, ArbitratorState::DualTaken, "FloorRequest");
        info!("[arbitrator] call={} dual floor granted to user={}", self.call_id, req.user_id);

        self.send_granted(ctx, req.user_id, true);
        self.seq_num = self.seq_num.wrapping_add(1);
        let bits = req.indicator.to_bits().with(Indicator::DUAL_FLOOR);
        let (seq_num, permission) = (self.seq_num, !self.traits.broadcast);
        for user_id in self.others(&[req.user_id]) {
            self.send_to(ctx, user_id, FloorBody::Taken {
                granted_party:         req.user_id,
                permission_to_request: permission,
                user_id,
                seq_num,
                indicator:             bits,
            });
        }
        self.t12.start(ctx);
    }

    /// 두 번째 holder 해제, main holder 외 전원에게 Idle 후 Taken(main)
    fn release_second(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        let Some(s) = self.second.take() else { return };
        self.t12.stop(ctx);
        self.release_holder_towards(ctx, s.user_id, trigger);

        let Some(main) = self.holder else {
            self.enter_idle(ctx, trigger, None);
            return;
        };
        self.set_state(ctx, ArbitratorState::Taken, trigger);
        self.seq_num = self.seq_num.wrapping_add(1);
        for user_id in self.others(&[main.user_id]) {
            self.send_idle_to(ctx, user_id);
        }
        self.broadcast_taken(ctx, main, &[main.user_id]);
    }

    /// main holder 해제: 두 번째 holder가 main이 된다
    fn release_main_in_dual(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        self.t1.stop(ctx);
        self.t2.stop(ctx);
        self.t12.stop(ctx);
        self.holder = self.second.take();
        let Some(main) = self.holder else {
            self.enter_idle(ctx, trigger, None);
            return;
        };
        self.set_state(ctx, ArbitratorState::Taken, trigger);
        self.trace_talker(ctx, main.user_id);
        self.seq_num = self.seq_num.wrapping_add(1);
        self.broadcast_taken(ctx, main, &[main.user_id]);
        self.t1.start(ctx);
        self.t2.start(ctx);
    }

    fn release_holder_towards(&mut self, ctx: &mut Ctx<'_>, user_id: u32, trigger: &'static str) {
        if let Some(i) = self.index_of(user_id) {
            self.participants[i].released(ctx, trigger);
        }
    }

    // ------------------------------------------------------------------------
    // 송신 헬퍼
    // ------------------------------------------------------------------------

    fn others(&self, except: &[u32]) -> Vec<u32> {
        self.participants.iter()
            .map(|p| p.user_id())
            .filter(|u| !except.contains(u))
            .collect()
    }

    fn send_to(&mut self, ctx: &mut Ctx<'_>, user_id: u32, body: FloorBody) {
        if let Some(i) = self.index_of(user_id) {
            self.participants[i].send(ctx, body);
        }
    }

    fn send_granted(&mut self, ctx: &mut Ctx<'_>, user_id: u32, dual: bool) {
        let holder = if dual { self.second } else { self.holder };
        let Some(h) = holder else { return };
        let mut indicator = h.indicator.to_bits();
        if dual {
            indicator = indicator.with(Indicator::DUAL_FLOOR);
        }
        let duration = if dual { self.config.t12_ms } else { self.config.t2_ms };
        let body = FloorBody::Granted {
            duration:   u16::try_from(duration / 1_000).unwrap_or(u16::MAX),
            priority:   h.priority,
            user_id,
            queue_size: self.queue.len() as u16,
            indicator,
        };
        self.send_to(ctx, user_id, body);
    }

    fn broadcast_taken(&mut self, ctx: &mut Ctx<'_>, holder: Holder, except: &[u32]) {
        for user_id in self.others(except) {
            self.send_taken_to(ctx, user_id, holder);
        }
    }

    fn send_taken_to(&mut self, ctx: &mut Ctx<'_>, user_id: u32, holder: Holder) {
        let body = FloorBody::Taken {
            granted_party:         holder.user_id,
            permission_to_request: !self.traits.broadcast,
            user_id,
            seq_num:               self.seq_num,
            indicator:             holder.indicator.to_bits(),
        };
        self.send_to(ctx, user_id, body);
    }

    fn send_idle_to(&mut self, ctx: &mut Ctx<'_>, user_id: u32) {
        let body = FloorBody::Idle { seq_num: self.seq_num, indicator: self.traits.indicator.to_bits() };
        self.send_to(ctx, user_id, body);
    }

    fn deny(&mut self, ctx: &mut Ctx<'_>, user_id: u32, cause: RejectCause) {
        debug!("[arbitrator] call={} deny user={} cause={}", self.call_id, user_id, cause.code());
        let indicator = self.traits.indicator.to_bits();
        self.send_to(ctx, user_id, FloorBody::Deny { cause, user_id, indicator });
    }

    /// 대기 순번 통지: 대기열에 없으면 position 0
    fn send_queue_position(&mut self, ctx: &mut Ctx<'_>, user_id: u32) {
        let (position, priority, indicator) = match self.queue.get(user_id) {
            Some(e) => (
                self.queue.position(user_id).unwrap_or(0),
                e.priority,
                e.indicator.to_bits(),
            ),
            None => (0, 0, self.traits.indicator.to_bits()),
        };
        self.send_to(ctx, user_id, FloorBody::QueuePositionInfo {
            user_id,
            queued_user_id: user_id,
            position:       u8::try_from(position).unwrap_or(u8::MAX),
            priority,
            indicator:      indicator.with(Indicator::QUEUEING),
        });
    }
}

fn format_loc(loc: UserLoc) -> String {
    format!("({:.1},{:.1},{:.1})", loc.x, loc.y, loc.z)
}

/// 알 수 없는 송신자 보고용
fn body_user(body: &FloorBody) -> u32 {
    match body {
        FloorBody::Request { user_id, .. }
        | FloorBody::Release { user_id, .. }
        | FloorBody::QueuePositionRequest { user_id } => *user_id,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallTypePriorities;
    use crate::core::call::Member;
    use crate::core::timer::Scheduler;
    use crate::core::towards::TowardsState;
    use crate::protocol::{CallType, FloorKind};
    use crate::sim::testing::Harness;

    const CALL: u16 = 5;

    fn addr(user: u32) -> SocketAddr {
        SocketAddr::new(format!("10.1.0.{}", user).parse().unwrap(), 49150)
    }

    fn arbitrator(config: FloorConfig, users: &[u32]) -> FloorArbitrator {
        let traits = CallTraits::for_type(CallType::BasicGroup, &CallTypePriorities::default());
        let mut arb = FloorArbitrator::new(CALL, traits, config.clone());
        let local: SocketAddr = "10.0.0.1:49150".parse().unwrap();
        for &u in users {
            let member = Member::new(u, addr(u), 49151, 1);
            arb.add_participant(TowardsParticipant::new(CALL, member, local, &config));
        }
        arb
    }

    fn request(user: u32, priority: u8) -> FloorMessage {
        FloorMessage::new(CALL, user, FloorBody::Request { priority, user_id: user, indicator: Indicator::normal() })
    }

    fn release(user: u32) -> FloorMessage {
        FloorMessage::new(CALL, user, FloorBody::Release { user_id: user, indicator: Indicator::normal() })
    }

    /// 보낸 메시지 (수신자 user id, 종류)
    fn sent(h: &Harness) -> Vec<(u32, FloorKind)> {
        h.sent().iter()
            .map(|(_, to, raw)| {
                let user = match to.ip() {
                    std::net::IpAddr::V4(v4) => v4.octets()[3] as u32,
                    _ => 0,
                };
                (user, FloorMessage::decode(raw).unwrap().0.kind())
            })
            .collect()
    }

    #[test]
    fn idle_request_grants_and_notifies_others() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();

        assert_eq!(arb.state(), ArbitratorState::Taken);
        assert_eq!(arb.holder().unwrap().user_id, 1);
        assert_eq!(sent(&h), vec![(1, FloorKind::Granted), (2, FloorKind::Taken), (3, FloorKind::Taken)]);
        assert_eq!(arb.participant(1).unwrap().state(), TowardsState::Permitted);
    }

    #[test]
    fn granted_duration_follows_configured_t2() {
        let mut h = Harness::new();
        let config = FloorConfig { t2_ms: 12_500, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        let (msg, _) = FloorMessage::decode(&h.sent()[0].2).unwrap();
        assert!(matches!(msg.body, FloorBody::Granted { duration: 12, user_id: 1, .. }));
    }

    #[test]
    fn only_participant_is_denied() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::Idle);
        let (msg, _) = FloorMessage::decode(&h.sent()[0].2).unwrap();
        assert!(matches!(msg.body, FloorBody::Deny { cause: RejectCause::OnlyOneParticipant, .. }));
    }

    #[test]
    fn busy_without_queueing_denies() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(2), request(2, 5)).unwrap();
        let (msg, _) = FloorMessage::decode(&h.sent()[0].2).unwrap();
        assert!(matches!(msg.body, FloorBody::Deny { cause: RejectCause::AnotherClientHasPermission, user_id: 2, .. }));
        assert_eq!(arb.holder().unwrap().user_id, 1);
    }

    #[test]
    fn queueing_then_release_hands_over_without_idle() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(3), request(3, 2)).unwrap();
        assert_eq!(arb.queue().position(3), Some(1));
        assert_eq!(arb.queue().position(2), Some(2));

        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 3);
        let kinds = sent(&h);
        assert_eq!(kinds[0], (3, FloorKind::Granted));
        assert!(!kinds.iter().any(|(_, k)| *k == FloorKind::Idle));
    }

    #[test]
    fn duplicate_request_is_not_queued_twice() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        assert_eq!(arb.queue().len(), 1);
    }

    #[test]
    fn queued_release_withdraws_and_gets_taken() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(2), release(2)).unwrap();
        assert!(arb.queue().is_empty());
        assert_eq!(sent(&h), vec![(2, FloorKind::Taken)]);
        assert_eq!(arb.holder().unwrap().user_id, 1);
    }

    #[test]
    fn release_from_stranger_is_noop() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(3), release(3)).unwrap();
        assert!(h.sent().is_empty());
        assert_eq!(arb.state(), ArbitratorState::Taken);
        assert_eq!(arb.holder().unwrap().user_id, 1);
    }

    #[test]
    fn audio_cut_in_revokes_then_grants_preemptor() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::PendingRevoke);
        assert_eq!(sent(&h), vec![(1, FloorKind::Revoke)]);

        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 2);
        assert_eq!(sent(&h), vec![(2, FloorKind::Granted), (1, FloorKind::Taken)]);
    }

    #[test]
    fn higher_request_during_revoke_outranks_preemptor() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: true, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::PendingRevoke);
        assert_eq!(arb.queue().position(2), Some(1));

        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(3), request(3, 9)).unwrap();
        assert_eq!(sent(&h), vec![(3, FloorKind::QueuePositionInfo)]);
        assert_eq!(arb.queue().position(3), Some(1));
        assert_eq!(arb.queue().position(2), Some(2));

        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 3);
        assert_eq!(arb.queue().position(2), Some(1));
    }

    #[test]
    fn revoke_in_progress_queues_even_without_queueing() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(3), request(3, 9)).unwrap();
        assert!(sent(&h).is_empty());

        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 3);
        assert_eq!(
            sent(&h),
            vec![(2, FloorKind::Deny), (3, FloorKind::Granted), (1, FloorKind::Taken), (2, FloorKind::Taken)],
        );
        assert!(arb.queue().is_empty());
    }

    #[test]
    fn non_preemptive_request_during_revoke_is_denied_without_queueing() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(3), request(3, 1)).unwrap();
        assert_eq!(sent(&h), vec![(3, FloorKind::Deny)]);
    }

    #[test]
    fn audio_cut_in_revoke_does_not_wait_for_release() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        assert_eq!(arb.t3.remaining(h.sched.now()), Some(0));

        // T2로 인한 Revoke도 같은 설정을 따른다
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        let (key, handle) = h.timer(TimerId::T2).unwrap();
        arb.on_timer(&mut h.ctx(), key, handle).unwrap();
        assert_eq!(arb.t3.remaining(h.sched.now()), Some(0));
    }

    #[test]
    fn revoke_without_cut_in_waits_t3() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, ..Default::default() };
        let mut arb = arbitrator(config.clone(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        let (key, handle) = h.timer(TimerId::T2).unwrap();
        arb.on_timer(&mut h.ctx(), key, handle).unwrap();
        assert_eq!(arb.state(), ArbitratorState::PendingRevoke);
        assert_eq!(arb.t3.remaining(h.sched.now()), Some(config.t3_ms));
    }

    #[test]
    fn holder_media_relayed_and_t1_restarted() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        let voice = |u: u32| SocketAddr::new(addr(u).ip(), 49151);
        h.advance(1_000);
        h.clear_sent();

        let msg = MediaMessage::new(1, 0, 100_000, 0, 8);
        arb.receive_media(&mut h.ctx(), voice(1), msg, msg.encode()).unwrap();
        let to: Vec<SocketAddr> = h.sent().iter().map(|(_, to, _)| *to).collect();
        assert_eq!(to, vec![voice(2), voice(3)]);
        assert_eq!(arb.t1.remaining(h.sched.now()), Some(FloorConfig::default().t1_ms));

        h.clear_sent();
        arb.receive_media(&mut h.ctx(), voice(2), msg, msg.encode()).unwrap();
        assert!(h.sent().is_empty());
    }

    #[test]
    fn t1_expiry_without_media_ends_talk() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        h.clear_sent();

        let (key, handle) = h.timer(TimerId::T1).unwrap();
        arb.on_timer(&mut h.ctx(), key, handle).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 2);
        assert_eq!(arb.participant(1).unwrap().state(), TowardsState::NotPermitted);
        assert_eq!(sent(&h), vec![(2, FloorKind::Granted), (1, FloorKind::Taken), (3, FloorKind::Taken)]);
    }

    #[test]
    fn t3_expiry_forces_hand_over() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 2)).unwrap();
        let (key, handle) = h.timer(TimerId::T3).unwrap();
        arb.on_timer(&mut h.ctx(), key, handle).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 2);
        assert_eq!(arb.participant(1).unwrap().state(), TowardsState::NotPermitted);
    }

    #[test]
    fn t2_expiry_revokes_with_cause_2() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        h.clear_sent();
        let (key, handle) = h.timer(TimerId::T2).unwrap();
        arb.on_timer(&mut h.ctx(), key, handle).unwrap();
        let (msg, _) = FloorMessage::decode(&h.sent()[0].2).unwrap();
        assert!(matches!(msg.body, FloorBody::Revoke { cause: RejectCause::InternalError, .. }));

        // Release 후 대기열이 비었으면 Idle
        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::Idle);
    }

    #[test]
    fn t4_reports_inactivity() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        arb.start(&mut h.ctx());
        let (key, handle) = h.timer(TimerId::T4).unwrap();
        assert_eq!(arb.on_timer(&mut h.ctx(), key, handle).unwrap(), TimerOutcome::Inactive);
    }

    #[test]
    fn dual_floor_then_independent_releases() {
        let mut h = Harness::new();
        let config = FloorConfig { dual_floor_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(3), request(3, 2)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::DualTaken);
        assert_eq!(arb.second_holder().unwrap().user_id, 3);
        assert!(arb.participant(1).unwrap().is_overridden());

        // 두 holder 외의 요청은 선점 불가
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(2), request(2, 9)).unwrap();
        assert_eq!(sent(&h), vec![(2, FloorKind::Deny)]);

        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(3), release(3)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::Taken);
        assert_eq!(
            sent(&h),
            vec![(2, FloorKind::Idle), (3, FloorKind::Idle), (2, FloorKind::Taken), (3, FloorKind::Taken)],
        );

        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::Idle);
    }

    #[test]
    fn dual_main_release_promotes_second() {
        let mut h = Harness::new();
        let config = FloorConfig { dual_floor_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(3), request(3, 2)).unwrap();
        h.clear_sent();
        arb.receive(&mut h.ctx(), addr(1), release(1)).unwrap();
        assert_eq!(arb.state(), ArbitratorState::Taken);
        assert_eq!(arb.holder().unwrap().user_id, 3);
        assert!(arb.second_holder().is_none());
        assert_eq!(sent(&h), vec![(1, FloorKind::Taken), (2, FloorKind::Taken)]);
    }

    #[test]
    fn leave_of_holder_hands_over() {
        let mut h = Harness::new();
        let config = FloorConfig { audio_cut_in: false, queueing_supported: true, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2, 3]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        arb.receive(&mut h.ctx(), addr(2), request(2, 1)).unwrap();
        arb.leave(&mut h.ctx(), 1).unwrap();
        assert_eq!(arb.holder().unwrap().user_id, 2);
        assert!(arb.participant(1).is_none());
        assert!(arb.leave(&mut h.ctx(), 1).is_err());
    }

    #[test]
    fn unknown_sender_rejected() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        let err = arb.receive(&mut h.ctx(), addr(9), request(9, 1)).unwrap_err();
        assert_eq!(err, McpttError::UnknownParticipant(9));
    }

    #[test]
    fn server_bound_only_messages_are_invalid() {
        let mut h = Harness::new();
        let mut arb = arbitrator(FloorConfig::default(), &[1, 2]);
        let idle = FloorMessage::new(CALL, 1, FloorBody::Idle { seq_num: 0, indicator: Indicator::normal() });
        let err = arb.receive(&mut h.ctx(), addr(1), idle).unwrap_err();
        assert!(matches!(err, McpttError::InvalidTransition { state: "Idle", message: "FloorIdle" }));
    }

    #[test]
    fn ack_required_release_skips_idle_to_releaser() {
        let mut h = Harness::new();
        let config = FloorConfig { ack_required: true, audio_cut_in: false, ..Default::default() };
        let mut arb = arbitrator(config, &[1, 2]);
        arb.receive(&mut h.ctx(), addr(1), request(1, 1)).unwrap();
        h.clear_sent();
        let rel = release(1).with_ack(true);
        arb.receive(&mut h.ctx(), addr(1), rel).unwrap();
        assert_eq!(sent(&h), vec![(1, FloorKind::Ack), (2, FloorKind::Idle)]);
        assert_eq!(arb.participant(2).unwrap().pending_acks(), vec![FloorKind::Taken, FloorKind::Idle]);
    }
}
