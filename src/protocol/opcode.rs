// author: kodeholic (powered by Claude)

/// Floor Control 메시지 subtype (MBCP TS 24.380)
/// ACK 요청 변형은 `code | ACK_BIT`
pub mod floor {
    /// 발언권 요청
    pub const REQUEST:                u8 = 0;
    /// 발언권 허가
    pub const GRANTED:                u8 = 1;
    /// 다른 참가자가 발언 중
    pub const TAKEN:                  u8 = 2;
    /// 발언권 거부
    pub const DENY:                   u8 = 3;
    /// 발언권 반납 / 대기열 취소
    pub const RELEASE:                u8 = 4;
    /// 발언권 비어있음
    pub const IDLE:                   u8 = 5;
    /// 발언권 강제 회수
    pub const REVOKE:                 u8 = 6;
    pub const QUEUE_POSITION_REQUEST: u8 = 8;
    pub const QUEUE_POSITION_INFO:    u8 = 9;
    pub const ACK:                    u8 = 10;

    /// ACK 요청 비트
    pub const ACK_BIT:                u8 = 0x10;
}

/// 호 제어 메시지 타입 (그룹 / 개별 / 긴급 알림)
pub mod call {
    pub const GRP_PROBE:                 u8 = 1;
    pub const GRP_ANNOUN:                u8 = 2;
    pub const GRP_ACCEPT:                u8 = 3;
    pub const GRP_EMERG_END:             u8 = 4;
    pub const GRP_IMM_PERIL_END:         u8 = 5;
    pub const GRP_BROADCAST:             u8 = 6;
    pub const GRP_BROADCAST_END:         u8 = 7;
    pub const PRIVATE_SETUP_REQ:         u8 = 8;
    pub const PRIVATE_RINGING:           u8 = 9;
    pub const PRIVATE_ACCEPT:            u8 = 10;
    pub const PRIVATE_REJECT:            u8 = 11;
    pub const PRIVATE_RELEASE:           u8 = 12;
    pub const PRIVATE_RELEASE_ACK:       u8 = 13;
    pub const PRIVATE_ACCEPT_ACK:        u8 = 14;
    pub const PRIVATE_EMERG_CANCEL:      u8 = 15;
    pub const PRIVATE_EMERG_CANCEL_ACK:  u8 = 16;
    pub const GRP_EMERG_ALERT:           u8 = 17;
    pub const GRP_EMERG_ALERT_ACK:       u8 = 18;
    pub const GRP_EMERG_ALERT_CANCEL:    u8 = 19;
    pub const GRP_EMERG_ALERT_CANCEL_ACK: u8 = 20;
}

/// 온네트워크 세션 제어 (SIP INVITE / 응답 / BYE 대응)
pub mod session {
    pub const INVITE:   u8 = 33;
    pub const RESPONSE: u8 = 34;
    pub const BYE:      u8 = 35;
    /// 호 도중 단말 정보 갱신 (위치)
    pub const UPDATE:   u8 = 36;

    /// 응답 상태 코드
    pub const STATUS_TRYING:       u16 = 100;
    pub const STATUS_OK:           u16 = 200;
    pub const STATUS_NO_SUCH_CALL: u16 = 481;
    pub const STATUS_BUSY:         u16 = 486;
}

/// 선택적 정보 요소 식별자 (IEI)
pub mod iei {
    pub const USER_LOC:     u8 = 78;
    pub const CONFIRM_MODE: u8 = 80;
    pub const PROBE_RESP:   u8 = 81;
}
