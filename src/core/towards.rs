// author: kodeholic (powered by Claude)

// TowardsParticipant: arbitrator 쪽 참가자별 프록시
//
// arbitrator의 결정을 한 참가자에게 전달하고, ACK 의무를 추적한다.
//
//   send(body)        : ACK 비트 적용 → 인코딩 → 전송, ACK 요청이면 outstanding 등록
//   on_ack(kind)      : 같은 종류의 outstanding 해제
//   on_retry_timer    : 재전송, 한도 초과 시 DeliveryFailure (호는 계속)
//   forward_media     : holder 미디어를 이 참가자의 미디어 포트로 중계 (ACK 없음)
//
// 같은 종류의 메시지를 새로 보내면 이전 outstanding은 대체된다.

use std::net::SocketAddr;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::{self, FloorConfig};
use crate::core::call::Member;
use crate::core::timer::{Ctx, Timer, TimerHandle, TimerId, TimerKey, TimerOwner, SERVER_NODE};
use crate::error::{McpttError, McpttResult};
use crate::protocol::{FloorBody, FloorKind, FloorMessage, Indicator, MediaMessage, Source, UserLoc};
use crate::trace::{TraceDir, TraceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TowardsState {
    NotPermitted,
    Permitted,
    /// Revoke 송신, Release 대기
    PendingRevoke,
}

impl TowardsState {
    pub fn name(self) -> &'static str {
        match self {
            TowardsState::NotPermitted  => "NotPermitted",
            TowardsState::Permitted     => "Permitted",
            TowardsState::PendingRevoke => "PendingRevoke",
        }
    }
}

/// ACK 대기 중인 메시지
struct Outstanding {
    kind:     FloorKind,
    payload:  Bytes,
    /// 재전송 횟수 (최초 송신 제외)
    attempts: u32,
    timer:    Timer,
}

pub struct TowardsParticipant {
    call_id:      u16,
    member:       Member,
    /// 서버 floor 주소 (송신 출발지)
    local:        SocketAddr,
    /// 서버 미디어 주소 (중계 출발지)
    media_local:  SocketAddr,
    /// 서버가 보내는 메시지의 SSRC
    tx_ssrc:      u32,
    ack_required: bool,
    retry_ms:     u64,
    retry_limit:  u32,
    state:        TowardsState,
    /// 이중 floor에서 두 번째 holder에게 밀린 main holder
    overridden:   bool,
    outstanding:  Vec<Outstanding>,
}

impl TowardsParticipant {
    pub fn new(call_id: u16, member: Member, local: SocketAddr, config: &FloorConfig) -> Self {
        Self {
            call_id,
            member,
            local,
            media_local:  SocketAddr::new(local.ip(), config::MEDIA_PORT_BASE),
            tx_ssrc:      config.tx_ssrc,
            ack_required: config.ack_required,
            retry_ms:     config.ack_retry_interval_ms,
            retry_limit:  config.ack_retry_limit,
            state:        TowardsState::NotPermitted,
            overridden:   false,
            outstanding:  Vec::new(),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.member.user_id
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn addr(&self) -> SocketAddr {
        self.member.floor_addr
    }

    /// SDP m=audio 포트로 받는 미디어 목적지
    pub fn media_addr(&self) -> SocketAddr {
        SocketAddr::new(self.member.floor_addr.ip(), self.member.media_port)
    }

    pub fn state(&self) -> TowardsState {
        self.state
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn receive_only(&self) -> bool {
        self.member.receive_only
    }

    pub fn originator(&self) -> bool {
        self.member.originator
    }

    /// 호 도중 우선순위 변경 (요청 메시지의 priority 반영)
    pub fn set_priority(&mut self, priority: u8) {
        self.member.priority = priority;
    }

    pub fn set_location(&mut self, location: UserLoc) {
        self.member.location = location;
    }

    /// 수신 메시지 헤더의 SSRC 기록
    pub fn observe_ssrc(&mut self, ssrc: u32) {
        if ssrc != 0 {
            self.member.ssrc = ssrc;
        }
    }

    /// ACK를 기다리는 메시지 종류들
    pub fn pending_acks(&self) -> Vec<FloorKind> {
        self.outstanding.iter().map(|o| o.kind).collect()
    }

    // ------------------------------------------------------------------------
    // 송신
    // ------------------------------------------------------------------------

    pub fn send(&mut self, ctx: &mut Ctx<'_>, body: FloorBody) {
        let msg = FloorMessage::new(self.call_id, self.tx_ssrc, body).with_ack(self.ack_required);
        let payload = msg.encode();

        ctx.emit(TraceDir::Out, SERVER_NODE, self.call_id, self.member.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        trace!("[towards] -> user={} {}", self.member.user_id, msg.summary());
        ctx.send(self.local, self.member.floor_addr, payload.clone());

        self.track_state(ctx, &msg);

        if msg.ack_requested {
            let kind = msg.kind();
            if let Some(i) = self.outstanding.iter().position(|o| o.kind == kind) {
                let mut old = self.outstanding.remove(i);
                old.timer.stop(ctx);
            }
            let key = TimerKey::new(SERVER_NODE, self.call_id, TimerOwner::Towards(self.member.user_id), TimerId::AckRetry(kind));
            let mut timer = Timer::new(key, self.retry_ms);
            timer.start(ctx);
            self.outstanding.push(Outstanding { kind, payload, attempts: 0, timer });
        }
    }

    /// 받은 미디어 패킷을 그대로 중계
    pub fn forward_media(&mut self, ctx: &mut Ctx<'_>, msg: &MediaMessage, payload: Bytes) {
        ctx.emit(TraceDir::Out, SERVER_NODE, self.call_id, self.member.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        ctx.send(self.media_local, self.media_addr(), payload);
    }

    /// 참가자가 보낸 ACK 요청 메시지에 응답
    pub fn send_ack(&mut self, ctx: &mut Ctx<'_>, acked: FloorKind) {
        self.send(ctx, FloorBody::Ack { source: Source::ControllingFunction, acked });
    }

    fn track_state(&mut self, ctx: &mut Ctx<'_>, msg: &FloorMessage) {
        match &msg.body {
            FloorBody::Granted { .. } => {
                self.overridden = false;
                self.set_state(ctx, TowardsState::Permitted, msg.name());
            }
            FloorBody::Revoke { .. } => self.set_state(ctx, TowardsState::PendingRevoke, msg.name()),
            FloorBody::Taken { indicator, .. }
                if self.state == TowardsState::Permitted && indicator.contains(Indicator::DUAL_FLOOR) =>
            {
                // 두 번째 holder가 생겨도 main holder의 발언권은 유지
                self.overridden = true;
                debug!("[towards] user={} overridden by dual floor", self.member.user_id);
            }
            _ => {}
        }
    }

    /// arbitrator가 이 참가자의 발언권을 회수/해제 처리했을 때
    pub fn released(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        self.overridden = false;
        self.set_state(ctx, TowardsState::NotPermitted, trigger);
    }

    fn set_state(&mut self, ctx: &mut Ctx<'_>, new: TowardsState, trigger: &'static str) {
        if self.state == new {
            return;
        }
        let old = std::mem::replace(&mut self.state, new);
        ctx.emit(TraceDir::Sys, SERVER_NODE, self.call_id, self.member.user_id, TraceKind::StateChange {
            machine: "towards",
            old:     old.name(),
            new:     new.name(),
            trigger,
        });
    }

    // ------------------------------------------------------------------------
    // ACK / 재전송
    // ------------------------------------------------------------------------

    pub fn on_ack(&mut self, ctx: &mut Ctx<'_>, acked: FloorKind) {
        match self.outstanding.iter().position(|o| o.kind == acked) {
            Some(i) => {
                let mut done = self.outstanding.remove(i);
                done.timer.stop(ctx);
                trace!("[towards] user={} acked {}", self.member.user_id, acked.name());
            }
            None => debug!("[towards] user={} unexpected ack for {}", self.member.user_id, acked.name()),
        }
    }

    pub fn on_retry_timer(&mut self, ctx: &mut Ctx<'_>, kind: FloorKind, handle: TimerHandle) -> McpttResult<()> {
        let Some(i) = self.outstanding.iter().position(|o| o.kind == kind) else {
            return Ok(());
        };
        if !self.outstanding[i].timer.expire(handle) {
            return Ok(());
        }

        if self.outstanding[i].attempts >= self.retry_limit {
            let failed = self.outstanding.remove(i);
            let attempts = failed.attempts + 1;
            ctx.emit(TraceDir::Sys, SERVER_NODE, self.call_id, self.member.user_id, TraceKind::DeliveryFailure {
                name: kind.name(),
                attempts,
            });
            warn!("[towards] user={} no ack for {} after {} sends", self.member.user_id, kind.name(), attempts);
            return Err(McpttError::DeliveryFailure {
                user_id: self.member.user_id,
                message: kind.name(),
                attempts,
            });
        }

        let entry = &mut self.outstanding[i];
        entry.attempts += 1;
        ctx.emit(TraceDir::Out, SERVER_NODE, self.call_id, self.member.user_id, TraceKind::Message {
            name:   kind.name(),
            header: format!("{} retransmit #{}", kind.name(), entry.attempts),
        });
        ctx.send(self.local, self.member.floor_addr, entry.payload.clone());
        entry.timer.start(ctx);
        Ok(())
    }

    /// 호 종료 / 참가자 이탈, 모든 재전송 타이머 정리
    pub fn cancel_all(&mut self, ctx: &mut Ctx<'_>) {
        for mut o in self.outstanding.drain(..) {
            o.timer.stop(ctx);
        }
    }
}
