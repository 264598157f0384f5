// author: kodeholic (powered by Claude)
// PttApp: 단말 1대의 MCPTT 애플리케이션 (클라이언트 측 호 제어 코디네이터)
//
// 호 제어 상태머신 (호별):
//   Null       → initiate_call        → Initiating (Invite → 서버)
//   Initiating → 200 OK               → Active
//   Initiating → 486 / 481            → Null
//   (수신) Invite                     → Active (200 OK + 내 SDP)
//   Active     → release_call         → Releasing (Bye → 서버)
//   Releasing  → 200 OK               → Null
//   Active     → Bye 수신             → Null (200 OK)
//
// floor 동작(push / release)은 Active 호의 FloorParticipant에 위임한다.
// 수신 포트로 분기: 세션 포트 / 호별 floor 포트 / 호별 미디어 포트.
// 위치가 바뀌면 Active 호마다 Update로 서버에 알린다.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, warn};

use crate::config::{self, CallTypePriorities, ParticipantConfig};
use crate::core::alloc::Allocator;
use crate::core::call::{Call, CallState, CallTraits};
use crate::core::participant::{FloorParticipant, ParticipantState};
use crate::core::timer::{Ctx, TimerHandle, TimerKey};
use crate::error::{McpttError, McpttResult};
use crate::protocol::opcode::session as status;
use crate::protocol::{CallType, FloorMessage, MediaMessage, Sdp, SessionMessage, UserLoc};
use crate::trace::{TraceDir, TraceKind};

pub struct ClientCall {
    pub call:   Call,
    state:      CallState,
    floor:      FloorParticipant,
    floor_port: u16,
    media_port: u16,
}

impl ClientCall {
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn floor(&self) -> &FloorParticipant {
        &self.floor
    }

    pub fn ports(&self) -> (u16, u16) {
        (self.floor_port, self.media_port)
    }
}

pub struct PttApp {
    user_id:    u32,
    ip:         IpAddr,
    server:     IpAddr,
    config:     ParticipantConfig,
    priorities: CallTypePriorities,
    alloc:      Allocator,
    calls:      BTreeMap<u16, ClientCall>,
    location:   UserLoc,
}

impl PttApp {
    pub fn new(
        user_id:    u32,
        ip:         IpAddr,
        server:     IpAddr,
        config:     ParticipantConfig,
        priorities: CallTypePriorities,
        seed:       u64,
    ) -> Self {
        Self {
            user_id,
            ip,
            server,
            config,
            priorities,
            alloc:    Allocator::new(seed),
            calls:    BTreeMap::new(),
            location: UserLoc::default(),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn call(&self, call_id: u16) -> Option<&ClientCall> {
        self.calls.get(&call_id)
    }

    /// 첫 번째 Active 호
    pub fn active_call(&self) -> Option<u16> {
        self.calls.iter().find(|(_, c)| c.state == CallState::Active).map(|(id, _)| *id)
    }

    pub fn location(&self) -> UserLoc {
        self.location
    }

    pub fn floor_state(&self, call_id: u16) -> Option<ParticipantState> {
        self.calls.get(&call_id).map(|c| c.floor.state())
    }

    fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, config::SESSION_PORT)
    }

    fn server_session(&self) -> SocketAddr {
        SocketAddr::new(self.server, config::SESSION_PORT)
    }

    fn new_call(&mut self, call: Call, server_floor: SocketAddr, server_media: SocketAddr) -> ClientCall {
        let (floor_port, media_port) = self.alloc.next_ports();
        let ssrc = self.alloc.next_ssrc();
        let traits = CallTraits::for_type(call.call_type, &self.priorities);
        let floor = FloorParticipant::new(
            call.call_id,
            self.user_id,
            ssrc,
            traits.priority,
            traits.indicator,
            &self.config,
            SocketAddr::new(self.ip, floor_port),
            server_floor,
        )
        .with_media(SocketAddr::new(self.ip, media_port), server_media);
        ClientCall { call, state: CallState::Null, floor, floor_port, media_port }
    }

    fn my_sdp(&self, entry: &ClientCall) -> Sdp {
        Sdp::new(self.ip, self.ip, entry.media_port, entry.floor_port)
    }

    // ------------------------------------------------------------------------
    // 사용자 동작
    // ------------------------------------------------------------------------

    /// 호 발신: 새 call id 반환. 개별 호는 grp_id 자리에 착신자 user id
    pub fn initiate_call(&mut self, ctx: &mut Ctx<'_>, call_type: CallType, grp_id: u32) -> McpttResult<u16> {
        let call_id = self.alloc.next_call_id()?;
        let call = Call::new(call_id, call_type, grp_id, self.user_id, ctx.now());
        // 서버 floor 주소는 200 OK의 SDP로 확정
        let server_floor = SocketAddr::new(self.server, config::FLOOR_PORT_BASE);
        let server_media = SocketAddr::new(self.server, config::MEDIA_PORT_BASE);
        let mut entry = self.new_call(call, server_floor, server_media);

        let invite = SessionMessage::Invite { call_id, call_type, grp_id, from: self.user_id, sdp: self.my_sdp(&entry) };
        self.transmit(ctx, invite);
        self.set_call_state(ctx, &mut entry, CallState::Initiating, "InitiateCall");
        self.calls.insert(call_id, entry);
        info!("[call] user={} initiating call={} type={} grp={}", self.user_id, call_id, call_type.name(), grp_id);
        Ok(call_id)
    }

    pub fn release_call(&mut self, ctx: &mut Ctx<'_>, call_id: u16) -> McpttResult<()> {
        let mut entry = self.calls.remove(&call_id).ok_or(McpttError::UnknownCall(call_id))?;
        if entry.state != CallState::Active {
            let state = entry.state.name();
            self.calls.insert(call_id, entry);
            return Err(McpttError::InvalidTransition { state, message: "ReleaseCall" });
        }
        entry.floor.stop(ctx);
        self.transmit(ctx, SessionMessage::Bye { call_id, from: self.user_id });
        self.set_call_state(ctx, &mut entry, CallState::Releasing, "ReleaseCall");
        self.calls.insert(call_id, entry);
        Ok(())
    }

    /// PTT 누름
    pub fn push(&mut self, ctx: &mut Ctx<'_>, call_id: u16) -> McpttResult<()> {
        self.active_floor(call_id, "PushToTalk")?.request_floor(ctx);
        Ok(())
    }

    /// PTT 뗌
    pub fn release(&mut self, ctx: &mut Ctx<'_>, call_id: u16) -> McpttResult<()> {
        self.active_floor(call_id, "PttRelease")?.release_floor(ctx);
        Ok(())
    }

    pub fn request_queue_position(&mut self, ctx: &mut Ctx<'_>, call_id: u16) -> McpttResult<()> {
        self.active_floor(call_id, "QueuePositionRequest")?.request_queue_position(ctx)
    }

    /// 호 도중 우선순위 변경, 다음 Request부터 적용
    pub fn set_priority(&mut self, call_id: u16, priority: u8) -> McpttResult<()> {
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;
        entry.floor.set_priority(priority);
        debug!("[call] user={} call={} priority -> {}", self.user_id, call_id, priority);
        Ok(())
    }

    /// 위치 변경: Active 호마다 Update 송신
    pub fn set_location(&mut self, ctx: &mut Ctx<'_>, location: UserLoc) {
        self.location = location;
        let active: Vec<u16> = self.calls.iter()
            .filter(|(_, c)| c.state == CallState::Active)
            .map(|(id, _)| *id)
            .collect();
        for call_id in active {
            self.transmit(ctx, SessionMessage::Update { call_id, from: self.user_id, location });
        }
    }

    fn active_floor(&mut self, call_id: u16, action: &'static str) -> McpttResult<&mut FloorParticipant> {
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;
        if entry.state != CallState::Active {
            return Err(McpttError::InvalidTransition { state: entry.state.name(), message: action });
        }
        Ok(&mut entry.floor)
    }

    // ------------------------------------------------------------------------
    // 수신
    // ------------------------------------------------------------------------

    pub fn on_receive(&mut self, ctx: &mut Ctx<'_>, to: SocketAddr, raw: &[u8]) -> McpttResult<()> {
        if to.port() == config::SESSION_PORT {
            let (msg, _) = SessionMessage::decode(raw)?;
            self.handle_session(ctx, msg)
        } else if let Some(call_id) = self.call_by_media_port(to.port()) {
            let (msg, _) = MediaMessage::decode(raw)?;
            self.handle_media(ctx, call_id, msg)
        } else {
            let (msg, _) = FloorMessage::decode(raw)?;
            self.handle_floor(ctx, to, msg)
        }
    }

    pub fn handle_floor(&mut self, ctx: &mut Ctx<'_>, to: SocketAddr, msg: FloorMessage) -> McpttResult<()> {
        let entry = self.calls.get_mut(&msg.call_id).ok_or(McpttError::UnknownCall(msg.call_id))?;
        if entry.state != CallState::Active || entry.floor_port != to.port() {
            return Err(McpttError::InvalidTransition { state: entry.state.name(), message: msg.name() });
        }
        entry.floor.receive(ctx, msg)
    }

    fn call_by_media_port(&self, port: u16) -> Option<u16> {
        self.calls.iter().find(|(_, c)| c.media_port == port).map(|(id, _)| *id)
    }

    pub fn handle_media(&mut self, ctx: &mut Ctx<'_>, call_id: u16, msg: MediaMessage) -> McpttResult<()> {
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;
        if entry.state != CallState::Active {
            return Err(McpttError::InvalidTransition { state: entry.state.name(), message: msg.name() });
        }
        entry.floor.receive_media(ctx, msg)
    }

    pub fn handle_session(&mut self, ctx: &mut Ctx<'_>, msg: SessionMessage) -> McpttResult<()> {
        ctx.emit(TraceDir::In, self.user_id, msg.call_id(), self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        match msg {
            SessionMessage::Invite { call_id, call_type, grp_id, from, sdp } => {
                self.on_invite(ctx, call_id, call_type, grp_id, from, sdp)
            }
            SessionMessage::Response { call_id, status, sdp, .. } => self.on_response(ctx, call_id, status, sdp),
            SessionMessage::Bye { call_id, .. } => self.on_bye(ctx, call_id),
            SessionMessage::Update { call_id, .. } => {
                Err(McpttError::InvalidTransition { state: self.call_state_name(call_id), message: "Update" })
            }
        }
    }

    fn on_invite(
        &mut self,
        ctx:       &mut Ctx<'_>,
        call_id:   u16,
        call_type: CallType,
        grp_id:    u32,
        orig:      u32,
        sdp:       Sdp,
    ) -> McpttResult<()> {
        if self.calls.contains_key(&call_id) || !self.alloc.reserve_call_id(call_id) {
            warn!("[call] user={} busy for call={}", self.user_id, call_id);
            self.transmit(ctx, SessionMessage::Response { call_id, status: status::STATUS_BUSY, from: self.user_id, sdp: None });
            return Ok(());
        }
        let call = Call::new(call_id, call_type, grp_id, orig, ctx.now());
        let mut entry = self.new_call(
            call,
            SocketAddr::new(sdp.origin, sdp.floor_port),
            SocketAddr::new(sdp.origin, sdp.speech_port),
        );
        let ok = SessionMessage::Response {
            call_id,
            status: status::STATUS_OK,
            from:   self.user_id,
            sdp:    Some(self.my_sdp(&entry)),
        };
        self.transmit(ctx, ok);
        self.set_call_state(ctx, &mut entry, CallState::Active, "Invite");
        self.calls.insert(call_id, entry);
        self.report_location(ctx, call_id);
        Ok(())
    }

    fn on_response(&mut self, ctx: &mut Ctx<'_>, call_id: u16, code: u16, sdp: Option<Sdp>) -> McpttResult<()> {
        let mut entry = self.calls.remove(&call_id).ok_or_else(|| {
            warn!("[call] user={} response for unknown call={}", self.user_id, call_id);
            McpttError::UnknownCall(call_id)
        })?;

        match (entry.state, code) {
            (CallState::Initiating, status::STATUS_TRYING) => {}
            (CallState::Initiating, status::STATUS_OK) => {
                if let Some(sdp) = sdp {
                    entry.floor.set_server(
                        SocketAddr::new(sdp.origin, sdp.floor_port),
                        SocketAddr::new(sdp.origin, sdp.speech_port),
                    );
                }
                self.set_call_state(ctx, &mut entry, CallState::Active, "200 OK");
                self.calls.insert(call_id, entry);
                self.report_location(ctx, call_id);
                return Ok(());
            }
            (CallState::Initiating, _) => {
                info!("[call] user={} call={} rejected ({})", self.user_id, call_id, code);
                self.set_call_state(ctx, &mut entry, CallState::Null, "Rejected");
                self.alloc.free_call_id(call_id);
                return Ok(());
            }
            (CallState::Releasing, status::STATUS_OK) => {
                self.set_call_state(ctx, &mut entry, CallState::Null, "200 OK");
                self.alloc.free_call_id(call_id);
                return Ok(());
            }
            (state, _) => {
                self.calls.insert(call_id, entry);
                return Err(McpttError::InvalidTransition { state: state.name(), message: "Response" });
            }
        }
        self.calls.insert(call_id, entry);
        Ok(())
    }

    fn on_bye(&mut self, ctx: &mut Ctx<'_>, call_id: u16) -> McpttResult<()> {
        let Some(mut entry) = self.calls.remove(&call_id) else {
            self.transmit(ctx, SessionMessage::Response { call_id, status: status::STATUS_NO_SUCH_CALL, from: self.user_id, sdp: None });
            return Err(McpttError::UnknownCall(call_id));
        };
        entry.floor.stop(ctx);
        self.transmit(ctx, SessionMessage::Response { call_id, status: status::STATUS_OK, from: self.user_id, sdp: None });
        self.set_call_state(ctx, &mut entry, CallState::Null, "Bye");
        self.alloc.free_call_id(call_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 타이머
    // ------------------------------------------------------------------------

    pub fn on_timer(&mut self, ctx: &mut Ctx<'_>, key: TimerKey, handle: TimerHandle) -> McpttResult<()> {
        let entry = self.calls.get_mut(&key.call_id).ok_or(McpttError::UnknownCall(key.call_id))?;
        entry.floor.on_timer(ctx, key.id, handle)
    }

    // ------------------------------------------------------------------------
    // 내부
    // ------------------------------------------------------------------------

    /// 호가 Active가 되면 현재 위치를 한 번 알린다 (원점이면 생략)
    fn report_location(&self, ctx: &mut Ctx<'_>, call_id: u16) {
        if self.location == UserLoc::default() {
            return;
        }
        self.transmit(ctx, SessionMessage::Update { call_id, from: self.user_id, location: self.location });
    }

    fn call_state_name(&self, call_id: u16) -> &'static str {
        self.calls.get(&call_id).map(|c| c.state.name()).unwrap_or(CallState::Null.name())
    }

    fn transmit(&self, ctx: &mut Ctx<'_>, msg: SessionMessage) {
        ctx.emit(TraceDir::Out, self.user_id, msg.call_id(), self.user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        ctx.send(self.session_addr(), self.server_session(), msg.encode());
    }

    fn set_call_state(&self, ctx: &mut Ctx<'_>, entry: &mut ClientCall, new: CallState, trigger: &'static str) {
        if entry.state == new {
            return;
        }
        let old = std::mem::replace(&mut entry.state, new);
        ctx.emit(TraceDir::Sys, self.user_id, entry.call.call_id, self.user_id, TraceKind::StateChange {
            machine: "call",
            old:     old.name(),
            new:     new.name(),
            trigger,
        });
        debug!("[call] user={} call={} {} -> {}", self.user_id, entry.call.call_id, old.name(), new.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::testing::Harness;

    fn app(user: u32) -> PttApp {
        PttApp::new(
            user,
            format!("10.1.0.{}", user).parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            ParticipantConfig::default(),
            CallTypePriorities::default(),
            user as u64,
        )
    }

    fn server_sdp() -> Sdp {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        Sdp::new(ip, ip, config::MEDIA_PORT_BASE, config::FLOOR_PORT_BASE)
    }

    fn last_session(h: &Harness) -> SessionMessage {
        SessionMessage::decode(&h.sent().last().unwrap().2).unwrap().0
    }

    #[test]
    fn initiate_then_accept() {
        let mut h = Harness::new();
        let mut a = app(1);
        let call_id = a.initiate_call(&mut h.ctx(), CallType::BasicGroup, 1).unwrap();
        assert!(matches!(last_session(&h), SessionMessage::Invite { grp_id: 1, from: 1, .. }));
        assert_eq!(a.call(call_id).unwrap().state(), CallState::Initiating);
        assert!(a.push(&mut h.ctx(), call_id).is_err());

        let trying = SessionMessage::Response { call_id, status: status::STATUS_TRYING, from: 0, sdp: None };
        a.handle_session(&mut h.ctx(), trying).unwrap();
        let ok = SessionMessage::Response { call_id, status: status::STATUS_OK, from: 0, sdp: Some(server_sdp()) };
        a.handle_session(&mut h.ctx(), ok).unwrap();
        assert_eq!(a.active_call(), Some(call_id));
        assert_eq!(a.floor_state(call_id), Some(ParticipantState::NoPermission));

        a.push(&mut h.ctx(), call_id).unwrap();
        assert_eq!(a.floor_state(call_id), Some(ParticipantState::PendingRequest));
    }

    #[test]
    fn invited_call_answers_with_sdp() {
        let mut h = Harness::new();
        let mut a = app(2);
        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite.clone()).unwrap();
        match last_session(&h) {
            SessionMessage::Response { status: status::STATUS_OK, sdp: Some(sdp), .. } => {
                assert_eq!(sdp.floor_port, a.call(40).unwrap().ports().0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(a.call(40).unwrap().state(), CallState::Active);

        // 같은 call id로 다시 초대되면 Busy
        a.handle_session(&mut h.ctx(), invite).unwrap();
        assert_eq!(last_session(&h).name(), "486 Busy");
    }

    #[test]
    fn unknown_call_response_is_rejected_without_change() {
        let mut h = Harness::new();
        let mut a = app(1);
        let ok = SessionMessage::Response { call_id: 5, status: status::STATUS_OK, from: 0, sdp: None };
        assert_eq!(a.handle_session(&mut h.ctx(), ok).unwrap_err(), McpttError::UnknownCall(5));
        assert!(a.call(5).is_none());
    }

    #[test]
    fn release_then_ok_returns_to_null() {
        let mut h = Harness::new();
        let mut a = app(2);
        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite).unwrap();
        a.release_call(&mut h.ctx(), 40).unwrap();
        assert_eq!(a.call(40).unwrap().state(), CallState::Releasing);
        assert_eq!(a.floor_state(40), Some(ParticipantState::Inactive));
        let ok = SessionMessage::Response { call_id: 40, status: status::STATUS_OK, from: 0, sdp: None };
        a.handle_session(&mut h.ctx(), ok).unwrap();
        assert!(a.call(40).is_none());
    }

    #[test]
    fn relayed_media_reaches_the_call_on_its_media_port() {
        let mut h = Harness::new();
        let mut a = app(2);
        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite).unwrap();
        let (floor_port, media_port) = a.call(40).unwrap().ports();

        let raw = MediaMessage::new(0xCC, 0, 0, 0, 8).encode();
        a.on_receive(&mut h.ctx(), SocketAddr::new(a.ip(), media_port), &raw).unwrap();
        assert_eq!(a.call(40).unwrap().floor().media_received(), 1);
        // floor 포트로 온 미디어는 floor 메시지로 해석되어 실패
        assert!(a.on_receive(&mut h.ctx(), SocketAddr::new(a.ip(), floor_port), &raw).is_err());
    }

    #[test]
    fn talker_media_goes_to_server_media_port() {
        let mut h = Harness::new();
        let mut a = app(2);
        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite).unwrap();
        a.push(&mut h.ctx(), 40).unwrap();
        let granted = FloorMessage::new(40, 0, crate::protocol::FloorBody::Granted {
            duration: 30, priority: 1, user_id: 2, queue_size: 0, indicator: crate::protocol::Indicator::normal(),
        });
        a.handle_floor(&mut h.ctx(), SocketAddr::new(a.ip(), a.call(40).unwrap().ports().0), granted).unwrap();

        let (from, to, raw) = h.sent().last().unwrap().clone();
        assert_eq!(from.port(), a.call(40).unwrap().ports().1);
        assert_eq!(to, SocketAddr::new("10.0.0.1".parse().unwrap(), config::MEDIA_PORT_BASE));
        assert_eq!(MediaMessage::decode(&raw).unwrap().0.seq, 0);
    }

    #[test]
    fn location_is_reported_per_active_call() {
        let mut h = Harness::new();
        let mut a = app(2);
        let loc = UserLoc::new(12.0, -3.5, 0.0);
        a.set_location(&mut h.ctx(), loc);
        assert!(h.sent().is_empty());

        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite).unwrap();
        assert_eq!(last_session(&h), SessionMessage::Update { call_id: 40, from: 2, location: loc });

        let moved = UserLoc::new(13.0, -3.5, 0.0);
        a.set_location(&mut h.ctx(), moved);
        assert_eq!(last_session(&h), SessionMessage::Update { call_id: 40, from: 2, location: moved });
        assert_eq!(a.location(), moved);
    }

    #[test]
    fn bye_from_server_tears_down() {
        let mut h = Harness::new();
        let mut a = app(2);
        let invite = SessionMessage::Invite { call_id: 40, call_type: CallType::BasicGroup, grp_id: 1, from: 1, sdp: server_sdp() };
        a.handle_session(&mut h.ctx(), invite).unwrap();
        a.handle_session(&mut h.ctx(), SessionMessage::Bye { call_id: 40, from: 0 }).unwrap();
        assert!(a.call(40).is_none());
        assert_eq!(last_session(&h).name(), "200 OK");
    }
}
