// author: kodeholic (powered by Claude)
// CallServer: 서버 측 호 제어 코디네이터
//
// 호 설정:
//   발신자 Invite  → 100 Trying(발신자), Invite(나머지 그룹 멤버)
//   멤버 200 OK    → 멤버 참가 (towards 프록시 생성)
//   대기 멤버 0명  → 200 OK(발신자), arbitrator 시작 (Idle → 전원)
//
// 호 해제:
//   멤버 Bye           → 그 멤버만 이탈, 200 OK
//   발신자 / 마지막 Bye → 나머지 전원 Bye, Releasing, 모든 200 수신 시 호 삭제
//   T4 (Idle 무활동)    → 서버가 먼저 전원에게 Bye
//
// floor 메시지는 모든 호가 서버 floor 포트 하나로 받고, 헤더의 call id로 분기한다.
// 미디어는 서버 미디어 포트 하나로 받고, 출발지 주소(SDP의 음성 포트)로 호를 찾는다.
// Update(위치)는 응답 없이 해당 호의 멤버 정보만 갱신한다.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::{self, CallTypePriorities, FloorConfig};
use crate::core::arbitrator::{FloorArbitrator, TimerOutcome};
use crate::core::call::{Call, CallState, CallTraits, Member};
use crate::core::timer::{Ctx, TimerHandle, TimerKey, SERVER_NODE};
use crate::core::towards::TowardsParticipant;
use crate::error::{McpttError, McpttResult};
use crate::protocol::opcode::session as status;
use crate::protocol::{FloorMessage, MediaMessage, Sdp, SessionMessage, UserLoc};
use crate::trace::{TraceDir, TraceKind};

/// 그룹 멤버 등록 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Subscriber {
    user_id:      u32,
    receive_only: bool,
}

pub struct ServerCall {
    pub call:       Call,
    state:          CallState,
    arbitrator:     FloorArbitrator,
    /// Invite 응답 대기 중인 멤버
    pending:        Vec<u32>,
    /// Bye 응답 대기 중인 멤버
    releasing:      Vec<u32>,
}

impl ServerCall {
    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn arbitrator(&self) -> &FloorArbitrator {
        &self.arbitrator
    }

    pub fn members(&self) -> Vec<u32> {
        self.arbitrator.participants().iter().map(|p| p.user_id()).collect()
    }
}

pub struct CallServer {
    ip:         IpAddr,
    config:     FloorConfig,
    priorities: CallTypePriorities,
    /// 등록된 단말 (user id → IP)
    users:      HashMap<u32, IpAddr>,
    groups:     BTreeMap<u32, Vec<Subscriber>>,
    calls:      BTreeMap<u16, ServerCall>,
}

impl CallServer {
    /// 모순된 설정은 여기서 거부, 어떤 호도 시작되기 전
    pub fn new(ip: IpAddr, config: FloorConfig, priorities: CallTypePriorities) -> McpttResult<Self> {
        config.validate()?;
        Ok(Self {
            ip,
            config,
            priorities,
            users:  HashMap::new(),
            groups: BTreeMap::new(),
            calls:  BTreeMap::new(),
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, config::SESSION_PORT)
    }

    pub fn floor_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, config::FLOOR_PORT_BASE)
    }

    pub fn config(&self) -> &FloorConfig {
        &self.config
    }

    /// 그룹에 단말 등록 (같은 user를 다시 넣으면 갱신)
    pub fn add_member(&mut self, grp_id: u32, user_id: u32, ip: IpAddr, receive_only: bool) {
        self.users.insert(user_id, ip);
        let group = self.groups.entry(grp_id).or_default();
        group.retain(|s| s.user_id != user_id);
        group.push(Subscriber { user_id, receive_only });
    }

    pub fn call(&self, call_id: u16) -> Option<&ServerCall> {
        self.calls.get(&call_id)
    }

    pub fn call_ids(&self) -> Vec<u16> {
        self.calls.keys().copied().collect()
    }

    fn sdp(&self) -> Sdp {
        Sdp::new(self.ip, self.ip, config::MEDIA_PORT_BASE, config::FLOOR_PORT_BASE)
    }

    // ------------------------------------------------------------------------
    // 수신 분기
    // ------------------------------------------------------------------------

    /// 도착 포트로 세션 / 미디어 / floor 메시지 구분
    pub fn on_receive(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, to: SocketAddr, raw: &[u8]) -> McpttResult<()> {
        if to.port() == config::SESSION_PORT {
            let (msg, _) = SessionMessage::decode(raw)?;
            self.handle_session(ctx, from, msg)
        } else if to.port() == config::MEDIA_PORT_BASE {
            let (msg, used) = MediaMessage::decode(raw)?;
            self.handle_media(ctx, from, msg, Bytes::copy_from_slice(&raw[..used]))
        } else {
            let (msg, _) = FloorMessage::decode(raw)?;
            self.handle_floor(ctx, from, msg)
        }
    }

    pub fn handle_floor(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, msg: FloorMessage) -> McpttResult<()> {
        let entry = self.calls.get_mut(&msg.call_id).ok_or(McpttError::UnknownCall(msg.call_id))?;
        if entry.state != CallState::Active {
            return Err(McpttError::InvalidTransition { state: entry.state.name(), message: msg.name() });
        }
        entry.arbitrator.receive(ctx, from, msg)
    }

    /// 미디어 중계: 출발지가 멤버 음성 주소인 Active 호
    pub fn handle_media(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, msg: MediaMessage, payload: Bytes) -> McpttResult<()> {
        let Some(entry) = self.calls.values_mut().find(|c| {
            c.arbitrator.participants().iter().any(|p| p.media_addr() == from)
        }) else {
            trace!("[call] media from {} matches no call, dropped", from);
            return Err(McpttError::UnknownCall(0));
        };
        if entry.state != CallState::Active {
            return Err(McpttError::InvalidTransition { state: entry.state.name(), message: msg.name() });
        }
        entry.arbitrator.receive_media(ctx, from, msg, payload)
    }

    pub fn handle_session(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, msg: SessionMessage) -> McpttResult<()> {
        ctx.emit(TraceDir::In, SERVER_NODE, msg.call_id(), msg.from(), TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        match msg {
            SessionMessage::Invite { call_id, call_type, grp_id, from: user_id, sdp } => {
                self.on_invite(ctx, from, call_id, call_type, grp_id, user_id, sdp)
            }
            SessionMessage::Response { call_id, status, from: user_id, sdp } => {
                self.on_response(ctx, call_id, status, user_id, sdp)
            }
            SessionMessage::Bye { call_id, from: user_id } => self.on_bye(ctx, from, call_id, user_id),
            SessionMessage::Update { call_id, from: user_id, location } => self.on_update(ctx, call_id, user_id, location),
        }
    }

    // ------------------------------------------------------------------------
    // 호 설정
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn on_invite(
        &mut self,
        ctx:       &mut Ctx<'_>,
        from:      SocketAddr,
        call_id:   u16,
        call_type: crate::protocol::CallType,
        grp_id:    u32,
        orig:      u32,
        sdp:       Sdp,
    ) -> McpttResult<()> {
        if self.calls.contains_key(&call_id) {
            warn!("[call] call id {} already in use, rejecting invite from user={}", call_id, orig);
            self.respond(ctx, from, call_id, status::STATUS_BUSY, None);
            return Ok(());
        }

        let traits = CallTraits::for_type(call_type, &self.priorities);
        // 개별 호: grp id 자리에 착신자 user id
        let invitees: Vec<Subscriber> = if traits.private {
            vec![Subscriber { user_id: grp_id, receive_only: false }]
        } else {
            match self.groups.get(&grp_id) {
                Some(group) => group.iter().copied().filter(|s| s.user_id != orig).collect(),
                None => {
                    warn!("[call] invite for unknown group {} from user={}", grp_id, orig);
                    self.respond(ctx, from, call_id, status::STATUS_NO_SUCH_CALL, None);
                    return Err(McpttError::ConfigurationError(format!("unknown group {}", grp_id)));
                }
            }
        };

        let mut arbitrator = FloorArbitrator::new(call_id, traits, self.config.clone());
        let mut originator = Member::new(orig, SocketAddr::new(sdp.origin, sdp.floor_port), sdp.speech_port, traits.priority);
        originator.originator   = true;
        originator.receive_only = self.is_receive_only(grp_id, orig);
        arbitrator.add_participant(TowardsParticipant::new(call_id, originator, self.floor_addr(), &self.config));

        let mut entry = ServerCall {
            call:      Call::new(call_id, call_type, grp_id, orig, ctx.now()),
            state:     CallState::Null,
            arbitrator,
            pending:   Vec::new(),
            releasing: Vec::new(),
        };
        set_call_state(ctx, &mut entry, CallState::Initiating, "Invite");

        self.respond(ctx, from, call_id, status::STATUS_TRYING, None);

        for s in invitees {
            let Some(ip) = self.users.get(&s.user_id).copied() else {
                warn!("[call] call={} user={} not registered, skipped", call_id, s.user_id);
                continue;
            };
            entry.pending.push(s.user_id);
            let invite = SessionMessage::Invite { call_id, call_type, grp_id, from: orig, sdp: self.sdp() };
            self.transmit(ctx, SocketAddr::new(ip, config::SESSION_PORT), s.user_id, invite);
        }

        info!("[call] call={} type={} grp={} orig={} inviting {}", call_id, call_type.name(), grp_id, orig, entry.pending.len());
        self.calls.insert(call_id, entry);
        self.try_activate(ctx, call_id);
        Ok(())
    }

    fn on_response(&mut self, ctx: &mut Ctx<'_>, call_id: u16, code: u16, user_id: u32, sdp: Option<Sdp>) -> McpttResult<()> {
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;

        let state = entry.state;
        match state {
            CallState::Initiating if entry.pending.contains(&user_id) => {
                entry.pending.retain(|u| *u != user_id);
                match (code, sdp) {
                    (status::STATUS_OK, Some(sdp)) => {
                        let grp_id = entry.call.grp_id;
                        let priority = entry.arbitrator.participants().first()
                            .map(|p| p.member().priority)
                            .unwrap_or(config::FLOOR_PRIORITY_DEFAULT);
                        let mut member = Member::new(user_id, SocketAddr::new(sdp.origin, sdp.floor_port), sdp.speech_port, priority);
                        member.receive_only = self.groups.get(&grp_id)
                            .and_then(|g| g.iter().find(|s| s.user_id == user_id))
                            .map(|s| s.receive_only)
                            .unwrap_or(false);
                        let towards = TowardsParticipant::new(call_id, member, self.floor_addr(), &self.config);
                        if let Some(entry) = self.calls.get_mut(&call_id) {
                            entry.arbitrator.add_participant(towards);
                            entry.call.touch(ctx.now(), user_id);
                        }
                        debug!("[call] call={} user={} joined", call_id, user_id);
                    }
                    (code, _) => info!("[call] call={} user={} declined ({})", call_id, user_id, code),
                }
                self.try_activate(ctx, call_id);
                Ok(())
            }
            CallState::Releasing if entry.releasing.contains(&user_id) => {
                entry.releasing.retain(|u| *u != user_id);
                if entry.releasing.is_empty() {
                    self.destroy(ctx, call_id);
                }
                Ok(())
            }
            // 진행 중 응답(100)은 상태 변화 없음
            _ if code == status::STATUS_TRYING => Ok(()),
            state => Err(McpttError::InvalidTransition { state: state.name(), message: "Response" }),
        }
    }

    fn on_update(&mut self, ctx: &mut Ctx<'_>, call_id: u16, user_id: u32, location: UserLoc) -> McpttResult<()> {
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;
        entry.arbitrator.set_location(user_id, location)?;
        entry.call.touch(ctx.now(), user_id);
        Ok(())
    }

    /// 응답 대기 멤버가 없으면 호 활성화
    fn try_activate(&mut self, ctx: &mut Ctx<'_>, call_id: u16) {
        let sdp = self.sdp();
        let Some(entry) = self.calls.get_mut(&call_id) else { return };
        if entry.state != CallState::Initiating || !entry.pending.is_empty() {
            return;
        }
        let orig = entry.call.orig_user_id;
        set_call_state(ctx, entry, CallState::Active, "AllAnswered");

        // 발신자가 Active가 된 뒤 Idle을 받도록 200 OK 먼저
        let orig_ip = entry.arbitrator.participant(orig).map(|p| p.addr().ip());
        if let Some(ip) = self.users.get(&orig).copied().or(orig_ip) {
            let ok = SessionMessage::Response { call_id, status: status::STATUS_OK, from: 0, sdp: Some(sdp) };
            self.transmit(ctx, SocketAddr::new(ip, config::SESSION_PORT), orig, ok);
        }
        if let Some(entry) = self.calls.get_mut(&call_id) {
            entry.arbitrator.start(ctx);
        }
    }

    // ------------------------------------------------------------------------
    // 호 해제
    // ------------------------------------------------------------------------

    fn on_bye(&mut self, ctx: &mut Ctx<'_>, from: SocketAddr, call_id: u16, user_id: u32) -> McpttResult<()> {
        if !self.calls.contains_key(&call_id) {
            self.respond(ctx, from, call_id, status::STATUS_NO_SUCH_CALL, None);
            return Err(McpttError::UnknownCall(call_id));
        }
        let entry = self.calls.get_mut(&call_id).ok_or(McpttError::UnknownCall(call_id))?;

        let members = entry.members();
        let last = members.len() <= 1 || members == [user_id];
        if entry.call.orig_user_id == user_id || last || entry.state != CallState::Active {
            self.respond(ctx, from, call_id, status::STATUS_OK, None);
            self.release_call(ctx, call_id, Some(user_id));
            return Ok(());
        }

        entry.arbitrator.leave(ctx, user_id)?;
        entry.call.touch(ctx.now(), user_id);
        self.respond(ctx, from, call_id, status::STATUS_OK, None);
        info!("[call] call={} user={} left", call_id, user_id);
        Ok(())
    }

    /// 서버 주도 호 해제, `initiator`는 이미 Bye를 보낸 쪽 (응답 대상 아님)
    pub fn release_call(&mut self, ctx: &mut Ctx<'_>, call_id: u16, initiator: Option<u32>) {
        let Some(entry) = self.calls.get_mut(&call_id) else { return };
        if entry.state == CallState::Releasing {
            return;
        }
        entry.arbitrator.stop(ctx);

        let mut targets: Vec<(u32, SocketAddr)> = entry.arbitrator.participants().iter()
            .filter(|p| Some(p.user_id()) != initiator)
            .map(|p| (p.user_id(), p.addr()))
            .collect();
        // 아직 Invite에 응답하지 않은 멤버에게도 Bye
        for user_id in entry.pending.drain(..) {
            if let Some(ip) = self.users.get(&user_id) {
                targets.push((user_id, SocketAddr::new(*ip, config::SESSION_PORT)));
            }
        }

        entry.releasing = targets.iter().map(|(u, _)| *u).collect();
        set_call_state(ctx, entry, CallState::Releasing, if initiator.is_some() { "Bye" } else { "T4" });

        for (user_id, addr) in targets {
            let ip = self.users.get(&user_id).copied().unwrap_or_else(|| addr.ip());
            let bye = SessionMessage::Bye { call_id, from: 0 };
            self.transmit(ctx, SocketAddr::new(ip, config::SESSION_PORT), user_id, bye);
        }

        if self.calls.get(&call_id).map(|c| c.releasing.is_empty()).unwrap_or(false) {
            self.destroy(ctx, call_id);
        }
    }

    fn destroy(&mut self, ctx: &mut Ctx<'_>, call_id: u16) {
        if let Some(mut entry) = self.calls.remove(&call_id) {
            entry.arbitrator.stop(ctx);
            set_call_state(ctx, &mut entry, CallState::Null, "Released");
            info!("[call] call={} released", call_id);
        }
    }

    // ------------------------------------------------------------------------
    // 타이머
    // ------------------------------------------------------------------------

    pub fn on_timer(&mut self, ctx: &mut Ctx<'_>, key: TimerKey, handle: TimerHandle) -> McpttResult<()> {
        let entry = self.calls.get_mut(&key.call_id).ok_or(McpttError::UnknownCall(key.call_id))?;
        if entry.arbitrator.on_timer(ctx, key, handle)? == TimerOutcome::Inactive {
            self.release_call(ctx, key.call_id, None);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 내부
    // ------------------------------------------------------------------------

    fn is_receive_only(&self, grp_id: u32, user_id: u32) -> bool {
        self.groups.get(&grp_id)
            .and_then(|g| g.iter().find(|s| s.user_id == user_id))
            .map(|s| s.receive_only)
            .unwrap_or(false)
    }

    fn respond(&self, ctx: &mut Ctx<'_>, to: SocketAddr, call_id: u16, code: u16, sdp: Option<Sdp>) {
        let user_id = self.users.iter().find(|(_, ip)| **ip == to.ip()).map(|(u, _)| *u).unwrap_or(0);
        let msg = SessionMessage::Response { call_id, status: code, from: 0, sdp };
        self.transmit(ctx, to, user_id, msg);
    }

    fn transmit(&self, ctx: &mut Ctx<'_>, to: SocketAddr, user_id: u32, msg: SessionMessage) {
        ctx.emit(TraceDir::Out, SERVER_NODE, msg.call_id(), user_id, TraceKind::Message {
            name:   msg.name(),
            header: msg.summary(),
        });
        ctx.send(self.session_addr(), to, msg.encode());
    }
}

fn set_call_state(ctx: &mut Ctx<'_>, entry: &mut ServerCall, new: CallState, trigger: &'static str) {
    if entry.state == new {
        return;
    }
    let old = std::mem::replace(&mut entry.state, new);
    ctx.emit(TraceDir::Sys, SERVER_NODE, entry.call.call_id, entry.call.orig_user_id, TraceKind::StateChange {
        machine: "call",
        old:     old.name(),
        new:     new.name(),
        trigger,
    });
}
