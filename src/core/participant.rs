// author: kodeholic (powered by Claude)
// FloorParticipant: 클라이언트 측 floor 상태머신 (참가자 1명, 호 1건)
//
// 상태머신:
//   NoPermission   → push                → PendingRequest (Request, T101)
//   PendingRequest → Granted             → HasPermission
//   PendingRequest → Deny                → NoPermission
//   PendingRequest → QueuePositionInfo   → Queued
//   PendingRequest → T101 x C101         → NoPermission (RequestFailed)
//   Queued         → Granted             → HasPermission
//   Queued         → Deny / Idle         → NoPermission
//   HasPermission  → release / Revoke    → PendingRelease (Release, T100)
//   HasPermission  → Idle / Taken(타인)  → NoPermission (서버가 발언권 회수, T1 등)
//   PendingRelease → Idle / Taken / Ack  → NoPermission
//   *              → stop                → Inactive
//
// ACK 요청 비트가 있는 수신 메시지에는 상태와 무관하게 Ack로 응답한다.
// HasPermission 동안에는 미디어 패킷을 주기적으로 서버 미디어 포트로 보낸다.

use std::net::SocketAddr;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::ParticipantConfig;
use crate::core::queue::FloorIndicator;
use crate::core::timer::{Counter, Ctx, Timer, TimerHandle, TimerId, TimerKey, TimerOwner};
use crate::error::{McpttError, McpttResult};
use crate::protocol::media_msg::to_rtp_units;
use crate::protocol::{FloorBody, FloorKind, FloorMessage, Indicator, MediaMessage, RejectCause, Source};
use crate::trace::{TraceDir, TraceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParticipantState {
    NoPermission,
    PendingRequest,
    Queued,
    HasPermission,
    PendingRelease,
    /// 이 단말에서 활성화되지 않은(해제된) 호
    Inactive,
}

impl ParticipantState {
    pub fn name(self) -> &'static str {
        match self {
            ParticipantState::NoPermission   => "NoPermission",
            ParticipantState::PendingRequest => "PendingRequest",
            ParticipantState::Queued         => "Queued",
            ParticipantState::HasPermission  => "HasPermission",
            ParticipantState::PendingRelease => "PendingRelease",
            ParticipantState::Inactive       => "Inactive",
        }
    }
}

pub struct FloorParticipant {
    call_id:      u16,
    user_id:      u32,
    ssrc:         u32,
    priority:     u8,
    indicator:    FloorIndicator,
    ack_required: bool,
    local:        SocketAddr,
    server:       SocketAddr,
    state:        ParticipantState,
    t100:         Timer,
    t101:         Timer,
    t104:         Timer,
    c100:         Counter,
    c101:         Counter,
    c104:         Counter,
    requested_at: Option<u64>,
    /// 마지막 QueuePositionInfo의 순번
    position:     Option<u8>,
    /// 마지막 Taken의 발언자
    talker:       Option<u32>,
    last_deny:    Option<RejectCause>,
    overridden:   bool,
    // 미디어 소스
    media_local:  SocketAddr,
    media_server: SocketAddr,
    media_tick:   Timer,
    media_bytes:  u16,
    media_seq:    u16,
    /// 현재 발언 구간 시작 시각
    talk_spurt:   Option<u64>,
    media_sent:   u64,
    media_rx:     u64,
}

/// floor 주소의 짝 포트 (floor + 1)
fn media_pair(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip(), addr.port().wrapping_add(1))
}

impl FloorParticipant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call_id:   u16,
        user_id:   u32,
        ssrc:      u32,
        priority:  u8,
        indicator: FloorIndicator,
        config:    &ParticipantConfig,
        local:     SocketAddr,
        server:    SocketAddr,
    ) -> Self {
        let key = |id| TimerKey::new(user_id, call_id, TimerOwner::Participant, id);
        Self {
            call_id,
            user_id,
            ssrc,
            priority: config.priority.unwrap_or(priority),
            indicator,
            ack_required: config.ack_required,
            local,
            server,
            state:        ParticipantState::NoPermission,
            t100:         Timer::new(key(TimerId::T100), config.t100_ms),
            t101:         Timer::new(key(TimerId::T101), config.t101_ms),
            t104:         Timer::new(key(TimerId::T104), config.t104_ms),
            c100:         Counter::new(config.c100),
            c101:         Counter::new(config.c101),
            c104:         Counter::new(config.c104),
            requested_at: None,
            position:     None,
            talker:       None,
            last_deny:    None,
            overridden:   false,
            media_local:  media_pair(local),
            media_server: media_pair(server),
            media_tick:   Timer::new(key(TimerId::MediaTick), config.media_interval_ms),
            media_bytes:  config.media_bytes,
            media_seq:    0,
            talk_spurt:   None,
            media_sent:   0,
            media_rx:     0,
        }
    }

    /// 미디어 주소 지정 (기본값은 floor 포트 + 1)
    pub fn with_media(mut self, local: SocketAddr, server: SocketAddr) -> Self {
        self.media_local  = local;
        self.media_server = server;
        self
    }

    pub fn state(&self) -> ParticipantState {
        self.state
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn queue_position(&self) -> Option<u8> {
        self.position
    }

    pub fn talker(&self) -> Option<u32> {
        self.talker
    }

    pub fn last_deny(&self) -> Option<RejectCause> {
        self.last_deny
    }

    /// 이중 floor에서 다른 holder와 동시 발언 중
    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// 200 OK의 SDP로 서버 floor / 미디어 주소 확정
    pub fn set_server(&mut self, server: SocketAddr, media: SocketAddr) {
        self.server       = server;
        self.media_server = media;
    }

    pub fn media_addr(&self) -> SocketAddr {
        self.media_local
    }

    /// 이번 호에서 보낸 미디어 패킷 수
    pub fn media_sent(&self) -> u64 {
        self.media_sent
    }

    /// 이번 호에서 받은 (중계된) 미디어 패킷 수
    pub fn media_received(&self) -> u64 {
        self.media_rx
    }

    pub fn is_sending_media(&self) -> bool {
        self.talk_spurt.is_some()
    }

    /// 다음 Request부터 적용
    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn set_indicator(&mut self, indicator: FloorIndicator) {
        self.indicator = indicator;
    }

    // ------------------------------------------------------------------------
    // 사용자 동작
    // ------------------------------------------------------------------------

    /// PTT 누름: NoPermission 외에서는 무시
    pub fn request_floor(&mut self, ctx: &mut Ctx<'_>) {
        if self.state != ParticipantState::NoPermission {
            debug!("[participant] user={} push ignored in {}", self.user_id, self.state.name());
            return;
        }
        self.last_deny = None;
        self.requested_at = Some(ctx.now());
        self.c101.reset();
        self.send_request(ctx);
        self.t101.start(ctx);
        self.set_state(ctx, ParticipantState::PendingRequest, "PushToTalk");
    }

    /// PTT 뗌: 발언 중이면 Release, 대기/요청 중이면 취소
    pub fn release_floor(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            ParticipantState::HasPermission
            | ParticipantState::Queued
            | ParticipantState::PendingRequest => {
                self.t101.stop(ctx);
                self.t104.stop(ctx);
                self.begin_release(ctx, "PttRelease");
            }
            _ => debug!("[participant] user={} release ignored in {}", self.user_id, self.state.name()),
        }
    }

    /// 대기 순번 조회
    pub fn request_queue_position(&mut self, ctx: &mut Ctx<'_>) -> McpttResult<()> {
        if self.state != ParticipantState::Queued {
            return Err(McpttError::InvalidTransition {
                state:   self.state.name(),
                message: FloorKind::QueuePositionRequest.name(),
            });
        }
        self.c104.reset();
        self.transmit(ctx, FloorBody::QueuePositionRequest { user_id: self.user_id }, false);
        self.t104.start(ctx);
        Ok(())
    }

    /// 호 해제: 타이머 정리 후 비활성
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        for timer in [&mut self.t100, &mut self.t101, &mut self.t104] {
            timer.stop(ctx);
        }
        self.stop_media(ctx);
        self.set_state(ctx, ParticipantState::Inactive, "CallRelease");
    }

    /// 서버가 중계한 다른 발언자의 미디어
    pub fn receive_media(&mut self, ctx: &mut Ctx<'_>, msg: MediaMessage) -> McpttResult<()> {
        if self.state == ParticipantState::Inactive {
            return Err(McpttError::InvalidTransition { state: self.state.name(), message: msg.name() });
        }
        ctx.emit(TraceDir::In, self.user_id, self.call_id, self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        self.media_rx += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 수신
    // ------------------------------------------------------------------------

    pub fn receive(&mut self, ctx: &mut Ctx<'_>, msg: FloorMessage) -> McpttResult<()> {
        ctx.emit(TraceDir::In, self.user_id, self.call_id, self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        trace!("[participant] user={} <- {}", self.user_id, msg.summary());

        if self.state == ParticipantState::Inactive {
            return Err(self.invalid(&msg));
        }
        if msg.ack_requested {
            self.transmit(ctx, FloorBody::Ack { source: Source::Participant, acked: msg.kind() }, false);
        }

        use ParticipantState::*;
        match (&msg.body, self.state) {
            (FloorBody::Granted { indicator, .. }, PendingRequest | Queued) => {
                self.t101.stop(ctx);
                self.t104.stop(ctx);
                self.position   = None;
                self.talker     = Some(self.user_id);
                self.overridden = false;
                if indicator.contains(Indicator::DUAL_FLOOR) {
                    info!("[participant] user={} granted as second talker", self.user_id);
                }
                if let Some(at) = self.requested_at.take() {
                    let millis = ctx.now().saturating_sub(at);
                    ctx.emit(TraceDir::Sys, self.user_id, self.call_id, self.user_id, TraceKind::AccessTime { millis });
                }
                self.set_state(ctx, HasPermission, msg.name());
                self.start_media(ctx);
            }
            // 재전송된 Granted
            (FloorBody::Granted { .. }, HasPermission) => {}

            (FloorBody::Deny { cause, .. }, PendingRequest | Queued) => {
                self.t101.stop(ctx);
                self.t104.stop(ctx);
                self.last_deny    = Some(*cause);
                self.requested_at = None;
                self.position     = None;
                info!("[participant] user={} denied cause={}", self.user_id, cause.code());
                self.set_state(ctx, NoPermission, msg.name());
            }

            (FloorBody::QueuePositionInfo { position, .. }, PendingRequest | Queued) => {
                self.t101.stop(ctx);
                self.t104.stop(ctx);
                self.position = Some(*position);
                self.set_state(ctx, Queued, msg.name());
            }

            (FloorBody::Revoke { cause, .. }, HasPermission) => {
                info!("[participant] user={} revoked cause={}", self.user_id, cause.code());
                self.begin_release(ctx, msg.name());
            }
            // Release 송신 직후 도착한 Revoke
            (FloorBody::Revoke { .. }, PendingRelease) => {}

            (FloorBody::Taken { granted_party, indicator, .. }, HasPermission) => {
                if indicator.contains(Indicator::DUAL_FLOOR) {
                    self.overridden = true;
                    debug!("[participant] user={} overridden by user={}", self.user_id, granted_party);
                } else if *granted_party != self.user_id {
                    self.lose_permission(ctx, msg.name());
                }
                self.talker = Some(*granted_party);
            }
            (FloorBody::Taken { .. }, PendingRelease) => {
                self.finish_release(ctx, msg.name());
            }
            (FloorBody::Taken { granted_party, .. }, _) => {
                self.talker = Some(*granted_party);
            }

            (FloorBody::Idle { .. }, PendingRelease) => self.finish_release(ctx, msg.name()),
            (FloorBody::Idle { .. }, HasPermission) => {
                self.talker = None;
                self.lose_permission(ctx, msg.name());
            }
            (FloorBody::Idle { .. }, Queued) => {
                self.t104.stop(ctx);
                self.position = None;
                self.talker   = None;
                self.set_state(ctx, NoPermission, msg.name());
            }
            (FloorBody::Idle { .. }, _) => {
                self.talker = None;
            }

            (FloorBody::Ack { acked: FloorKind::Release, .. }, PendingRelease) => {
                self.finish_release(ctx, msg.name());
            }
            (FloorBody::Ack { .. }, _) => {}

            _ => return Err(self.invalid(&msg)),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 타이머
    // ------------------------------------------------------------------------

    pub fn on_timer(&mut self, ctx: &mut Ctx<'_>, id: TimerId, handle: TimerHandle) -> McpttResult<()> {
        match id {
            TimerId::T101 if self.t101.expire(handle) => {
                self.c101.increment();
                if self.c101.is_limit_reached() {
                    let attempts = self.c101.value();
                    warn!("[participant] user={} request failed after {} attempts", self.user_id, attempts);
                    ctx.emit(TraceDir::Sys, self.user_id, self.call_id, self.user_id, TraceKind::RequestFailed { attempts });
                    self.requested_at = None;
                    self.set_state(ctx, ParticipantState::NoPermission, "T101");
                } else {
                    self.send_request(ctx);
                    self.t101.start(ctx);
                }
            }
            TimerId::T100 if self.t100.expire(handle) => {
                self.c100.increment();
                if self.c100.is_limit_reached() {
                    warn!("[participant] user={} release unconfirmed, giving up", self.user_id);
                    self.set_state(ctx, ParticipantState::NoPermission, "T100");
                } else {
                    self.send_release(ctx);
                    self.t100.start(ctx);
                }
            }
            TimerId::T104 if self.t104.expire(handle) => {
                self.c104.increment();
                if !self.c104.is_limit_reached() {
                    self.transmit(ctx, FloorBody::QueuePositionRequest { user_id: self.user_id }, false);
                    self.t104.start(ctx);
                }
            }
            TimerId::MediaTick if self.media_tick.expire(handle) => {
                if self.state == ParticipantState::HasPermission {
                    self.send_media(ctx);
                    self.media_tick.start(ctx);
                }
            }
            _ => trace!("[participant] user={} stale timer {:?}", self.user_id, id),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 내부
    // ------------------------------------------------------------------------

    fn begin_release(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        self.stop_media(ctx);
        self.requested_at = None;
        self.position     = None;
        self.c100.reset();
        self.send_release(ctx);
        self.t100.start(ctx);
        self.set_state(ctx, ParticipantState::PendingRelease, trigger);
    }

    fn finish_release(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        self.t100.stop(ctx);
        self.overridden = false;
        self.set_state(ctx, ParticipantState::NoPermission, trigger);
    }

    /// Release 없이 서버가 발언권을 가져감
    fn lose_permission(&mut self, ctx: &mut Ctx<'_>, trigger: &'static str) {
        info!("[participant] user={} lost permission ({})", self.user_id, trigger);
        self.stop_media(ctx);
        self.overridden = false;
        self.set_state(ctx, ParticipantState::NoPermission, trigger);
    }

    fn start_media(&mut self, ctx: &mut Ctx<'_>) {
        if self.media_tick.duration() == 0 {
            return;
        }
        self.talk_spurt = Some(ctx.now());
        self.send_media(ctx);
        self.media_tick.start(ctx);
    }

    fn stop_media(&mut self, ctx: &mut Ctx<'_>) {
        self.media_tick.stop(ctx);
        if self.talk_spurt.take().is_some() {
            debug!("[participant] user={} media stopped after {} packets", self.user_id, self.media_sent);
        }
    }

    fn send_media(&mut self, ctx: &mut Ctx<'_>) {
        let Some(spurt) = self.talk_spurt else { return };
        let msg = MediaMessage::new(
            self.ssrc,
            self.media_seq,
            to_rtp_units(ctx.now()),
            to_rtp_units(spurt),
            self.media_bytes,
        );
        self.media_seq  = self.media_seq.wrapping_add(1);
        self.media_sent += 1;
        ctx.emit(TraceDir::Out, self.user_id, self.call_id, self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        ctx.send(self.media_local, self.media_server, msg.encode());
    }

    fn send_request(&mut self, ctx: &mut Ctx<'_>) {
        let body = FloorBody::Request {
            priority:  self.priority,
            user_id:   self.user_id,
            indicator: self.indicator.to_bits(),
        };
        self.transmit(ctx, body, false);
    }

    fn send_release(&mut self, ctx: &mut Ctx<'_>) {
        let body = FloorBody::Release { user_id: self.user_id, indicator: self.indicator.to_bits() };
        let ack = self.ack_required;
        self.transmit(ctx, body, ack);
    }

    fn transmit(&mut self, ctx: &mut Ctx<'_>, body: FloorBody, ack: bool) {
        let msg = FloorMessage::new(self.call_id, self.ssrc, body).with_ack(ack);
        ctx.emit(TraceDir::Out, self.user_id, self.call_id, self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        trace!("[participant] user={} -> {}", self.user_id, msg.summary());
        ctx.send(self.local, self.server, msg.encode());
    }

    fn set_state(&mut self, ctx: &mut Ctx<'_>, new: ParticipantState, trigger: &'static str) {
        if self.state == new {
            return;
        }
        let old = std::mem::replace(&mut self.state, new);
        ctx.emit(TraceDir::Sys, self.user_id, self.call_id, self.user_id, TraceKind::StateChange {
            machine: "participant",
            old:     old.name(),
            new:     new.name(),
            trigger,
        });
        debug!("[participant] user={} {} -> {} ({})", self.user_id, old.name(), new.name(), trigger);
    }

    fn invalid(&self, msg: &FloorMessage) -> McpttError {
        McpttError::InvalidTransition { state: self.state.name(), message: msg.name() }
    }
}
