// author: kodeholic (powered by Claude)

// Call: MCPTT 호 1건의 메타데이터와 호 타입별 동작 차이 테이블
//
// 호 타입(basic / broadcast / emergency / imminent peril / private)은 하나의
// 상태머신을 공유하고, 다른 점은 CallTraits로만 표현한다.

use std::net::SocketAddr;

use serde::Serialize;

use crate::config::CallTypePriorities;
use crate::core::queue::FloorIndicator;
use crate::protocol::{CallType, UserLoc};

/// 호 제어 상태 (클라이언트 / 서버 공통)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallState {
    Null,
    /// 설정 요청 송신, 수락 대기
    Initiating,
    /// floor control 동작 중
    Active,
    /// 해제 요청 송신, 응답 대기
    Releasing,
}

impl CallState {
    pub fn name(self) -> &'static str {
        match self {
            CallState::Null       => "Null",
            CallState::Initiating => "Initiating",
            CallState::Active     => "Active",
            CallState::Releasing  => "Releasing",
        }
    }
}

/// 호 타입별 floor 동작 차이
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTraits {
    pub call_type: CallType,
    /// 참가자 기본 floor 우선순위
    pub priority:  u8,
    pub indicator: FloorIndicator,
    /// 발신자만 발언 가능 (Taken의 permission_to_request = false)
    pub broadcast: bool,
    /// 1:1 호: 멤버는 발신자와 착신자 둘
    pub private:   bool,
}

impl CallTraits {
    pub fn for_type(call_type: CallType, priorities: &CallTypePriorities) -> Self {
        let (priority, indicator, broadcast, private) = match call_type {
            CallType::BasicGroup       => (priorities.basic_group, FloorIndicator::Normal, false, false),
            CallType::Broadcast        => (priorities.broadcast, FloorIndicator::Broadcast, true, false),
            CallType::EmergencyGroup   => (priorities.emergency_group, FloorIndicator::Emergency, false, false),
            CallType::ImminentPeril    => (priorities.imminent_peril, FloorIndicator::ImminentPeril, false, false),
            CallType::Private          => (priorities.private, FloorIndicator::Normal, false, true),
            CallType::EmergencyPrivate => (priorities.emergency_private, FloorIndicator::Emergency, false, true),
        };
        Self { call_type, priority, indicator, broadcast, private }
    }
}

/// 호 1건
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    pub call_id:          u16,
    pub call_type:        CallType,
    pub grp_id:           u32,
    pub orig_user_id:     u32,
    pub created_at:       u64,
    pub last_chg_at:      u64,
    pub last_chg_user_id: u32,
}

impl Call {
    pub fn new(call_id: u16, call_type: CallType, grp_id: u32, orig_user_id: u32, now: u64) -> Self {
        Self {
            call_id,
            call_type,
            grp_id,
            orig_user_id,
            created_at:       now,
            last_chg_at:      now,
            last_chg_user_id: orig_user_id,
        }
    }

    /// 멤버 변경 기록
    pub fn touch(&mut self, now: u64, user_id: u32) {
        self.last_chg_at      = now;
        self.last_chg_user_id = user_id;
    }
}

/// 호 참가자: 서버가 SDP 협상으로 알게 된 원격 단말 정보
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub user_id:      u32,
    pub ssrc:         u32,
    pub priority:     u8,
    pub originator:   bool,
    /// floor 메시지 목적지 (SDP m=application)
    pub floor_addr:   SocketAddr,
    pub media_port:   u16,
    pub location:     UserLoc,
    pub receive_only: bool,
}

impl Member {
    pub fn new(user_id: u32, floor_addr: SocketAddr, media_port: u16, priority: u8) -> Self {
        Self {
            user_id,
            ssrc: 0,
            priority,
            originator: false,
            floor_addr,
            media_port,
            location: UserLoc::default(),
            receive_only: false,
        }
    }
}
