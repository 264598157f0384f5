// author: kodeholic (powered by Claude)

// MBCP Floor Control 메시지 코덱
//
// 헤더 (9 bytes):
//   | subtype (1) | call id (2) | ssrc (4) | length (2) |
//   subtype의 0x10 비트 = ACK 요청 변형
//   length = 뒤따르는 필드 영역 바이트 수
//
// 필드 (타입별 고정 순서):
//   | field id (1) | len (1) | value (len) |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::DecodeError;
use crate::protocol::cause::RejectCause;
use crate::protocol::field::{ensure, get_u16, get_u32, get_u8, Indicator};
use crate::protocol::opcode::floor as op;

const HEADER_LEN: usize = 9;

// 필드 ID
const F_PRIORITY:        u8 = 0;
const F_DURATION:        u8 = 1;
const F_REJECT_CAUSE:    u8 = 2;
const F_QUEUE_POS_INFO:  u8 = 3;
const F_GRANTED_PARTY:   u8 = 4;
const F_PERM_TO_REQUEST: u8 = 5;
const F_USER_ID:         u8 = 6;
const F_QUEUE_SIZE:      u8 = 7;
const F_SEQ_NUM:         u8 = 8;
const F_QUEUED_USER_ID:  u8 = 9;
const F_SOURCE:          u8 = 10;
const F_MSG_TYPE:        u8 = 12;
const F_INDICATOR:       u8 = 13;

// ----------------------------------------------------------------------------
// [FloorKind]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FloorKind {
    Request,
    Granted,
    Taken,
    Deny,
    Release,
    Idle,
    Revoke,
    QueuePositionRequest,
    QueuePositionInfo,
    Ack,
}

impl FloorKind {
    pub fn code(self) -> u8 {
        match self {
            FloorKind::Request              => op::REQUEST,
            FloorKind::Granted              => op::GRANTED,
            FloorKind::Taken                => op::TAKEN,
            FloorKind::Deny                 => op::DENY,
            FloorKind::Release              => op::RELEASE,
            FloorKind::Idle                 => op::IDLE,
            FloorKind::Revoke               => op::REVOKE,
            FloorKind::QueuePositionRequest => op::QUEUE_POSITION_REQUEST,
            FloorKind::QueuePositionInfo    => op::QUEUE_POSITION_INFO,
            FloorKind::Ack                  => op::ACK,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            op::REQUEST                => FloorKind::Request,
            op::GRANTED                => FloorKind::Granted,
            op::TAKEN                  => FloorKind::Taken,
            op::DENY                   => FloorKind::Deny,
            op::RELEASE                => FloorKind::Release,
            op::IDLE                   => FloorKind::Idle,
            op::REVOKE                 => FloorKind::Revoke,
            op::QUEUE_POSITION_REQUEST => FloorKind::QueuePositionRequest,
            op::QUEUE_POSITION_INFO    => FloorKind::QueuePositionInfo,
            op::ACK                    => FloorKind::Ack,
            _ => return None,
        })
    }

    /// ACK 요청 변형이 정의된 메시지인지
    pub fn has_ack_variant(self) -> bool {
        matches!(
            self,
            FloorKind::Granted
                | FloorKind::Taken
                | FloorKind::Deny
                | FloorKind::Release
                | FloorKind::Idle
                | FloorKind::Revoke
                | FloorKind::QueuePositionInfo
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FloorKind::Request              => "FloorRequest",
            FloorKind::Granted              => "FloorGranted",
            FloorKind::Taken                => "FloorTaken",
            FloorKind::Deny                 => "FloorDeny",
            FloorKind::Release              => "FloorRelease",
            FloorKind::Idle                 => "FloorIdle",
            FloorKind::Revoke               => "FloorRevoke",
            FloorKind::QueuePositionRequest => "FloorQueuePositionRequest",
            FloorKind::QueuePositionInfo    => "FloorQueuePositionInfo",
            FloorKind::Ack                  => "FloorAck",
        }
    }
}

/// ACK 메시지의 송신 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    Participant,
    ParticipatingFunction,
    ControllingFunction,
    NonControllingFunction,
}

impl Source {
    fn code(self) -> u16 {
        match self {
            Source::Participant            => 0,
            Source::ParticipatingFunction  => 1,
            Source::ControllingFunction    => 2,
            Source::NonControllingFunction => 3,
        }
    }

    fn from_code(code: u16) -> Result<Self, DecodeError> {
        Ok(match code {
            0 => Source::Participant,
            1 => Source::ParticipatingFunction,
            2 => Source::ControllingFunction,
            3 => Source::NonControllingFunction,
            _ => return Err(DecodeError::InvalidValue { field: "source", value: code as u32 }),
        })
    }
}

// ----------------------------------------------------------------------------
// [FloorBody] 메시지 종류별 필드
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloorBody {
    Request {
        priority:  u8,
        user_id:   u32,
        indicator: Indicator,
    },
    Granted {
        /// 허용 발언 시간 (초)
        duration:   u16,
        priority:   u8,
        user_id:    u32,
        queue_size: u16,
        indicator:  Indicator,
    },
    Taken {
        /// 현재 holder
        granted_party:         u32,
        permission_to_request: bool,
        user_id:               u32,
        seq_num:               u16,
        indicator:             Indicator,
    },
    Deny {
        cause:     RejectCause,
        user_id:   u32,
        indicator: Indicator,
    },
    Release {
        user_id:   u32,
        indicator: Indicator,
    },
    Idle {
        seq_num:   u16,
        indicator: Indicator,
    },
    Revoke {
        cause:     RejectCause,
        indicator: Indicator,
    },
    QueuePositionRequest {
        user_id: u32,
    },
    QueuePositionInfo {
        user_id:        u32,
        queued_user_id: u32,
        /// 1-based 대기 순번
        position:       u8,
        priority:       u8,
        indicator:      Indicator,
    },
    Ack {
        source: Source,
        /// ACK 대상 메시지 종류
        acked:  FloorKind,
    },
}

impl FloorBody {
    pub fn kind(&self) -> FloorKind {
        match self {
            FloorBody::Request { .. }              => FloorKind::Request,
            FloorBody::Granted { .. }              => FloorKind::Granted,
            FloorBody::Taken { .. }                => FloorKind::Taken,
            FloorBody::Deny { .. }                 => FloorKind::Deny,
            FloorBody::Release { .. }              => FloorKind::Release,
            FloorBody::Idle { .. }                 => FloorKind::Idle,
            FloorBody::Revoke { .. }               => FloorKind::Revoke,
            FloorBody::QueuePositionRequest { .. } => FloorKind::QueuePositionRequest,
            FloorBody::QueuePositionInfo { .. }    => FloorKind::QueuePositionInfo,
            FloorBody::Ack { .. }                  => FloorKind::Ack,
        }
    }
}

// ----------------------------------------------------------------------------
// [FloorMessage]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorMessage {
    pub call_id:       u16,
    pub ssrc:          u32,
    /// 수신측에 Ack 응답 요청 (ACK 변형이 있는 메시지만 유효)
    pub ack_requested: bool,
    pub body:          FloorBody,
}

impl FloorMessage {
    pub fn new(call_id: u16, ssrc: u32, body: FloorBody) -> Self {
        Self { call_id, ssrc, ack_requested: false, body }
    }

    /// ACK 변형이 없는 메시지에는 무시됨
    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack_requested = ack && self.body.kind().has_ack_variant();
        self
    }

    pub fn kind(&self) -> FloorKind {
        self.body.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn subtype(&self) -> u8 {
        let code = self.kind().code();
        if self.ack_requested && self.kind().has_ack_variant() {
            code | op::ACK_BIT
        } else {
            code
        }
    }

    /// 트레이스용 한 줄 요약
    pub fn summary(&self) -> String {
        let body = match &self.body {
            FloorBody::Request { priority, user_id, .. }  => format!("user={} prio={}", user_id, priority),
            FloorBody::Granted { user_id, priority, duration, .. } => {
                format!("user={} prio={} duration={}s", user_id, priority, duration)
            }
            FloorBody::Taken { granted_party, seq_num, .. } => format!("party={} seq={}", granted_party, seq_num),
            FloorBody::Deny { cause, user_id, .. }         => format!("user={} cause={}", user_id, cause.code()),
            FloorBody::Release { user_id, .. }             => format!("user={}", user_id),
            FloorBody::Idle { seq_num, .. }                => format!("seq={}", seq_num),
            FloorBody::Revoke { cause, .. }                => format!("cause={}", cause.code()),
            FloorBody::QueuePositionRequest { user_id }    => format!("user={}", user_id),
            FloorBody::QueuePositionInfo { queued_user_id, position, .. } => {
                format!("user={} pos={}", queued_user_id, position)
            }
            FloorBody::Ack { acked, .. }                   => format!("acked={}", acked.name()),
        };
        format!(
            "{}{} call={} ssrc={} {}",
            self.name(),
            if self.ack_requested { "(ack)" } else { "" },
            self.call_id,
            self.ssrc,
            body,
        )
    }

    pub fn encode(&self) -> Bytes {
        let mut fields = BytesMut::with_capacity(32);
        match &self.body {
            FloorBody::Request { priority, user_id, indicator } => {
                put_priority(&mut fields, *priority);
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Granted { duration, priority, user_id, queue_size, indicator } => {
                put_u16_field(&mut fields, F_DURATION, *duration);
                put_priority(&mut fields, *priority);
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u16_field(&mut fields, F_QUEUE_SIZE, *queue_size);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Taken { granted_party, permission_to_request, user_id, seq_num, indicator } => {
                put_u32_field(&mut fields, F_GRANTED_PARTY, *granted_party);
                put_u16_field(&mut fields, F_PERM_TO_REQUEST, u16::from(*permission_to_request));
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u16_field(&mut fields, F_SEQ_NUM, *seq_num);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Deny { cause, user_id, indicator } => {
                put_u16_field(&mut fields, F_REJECT_CAUSE, cause.code());
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Release { user_id, indicator } => {
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Idle { seq_num, indicator } => {
                put_u16_field(&mut fields, F_SEQ_NUM, *seq_num);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Revoke { cause, indicator } => {
                put_u16_field(&mut fields, F_REJECT_CAUSE, cause.code());
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::QueuePositionRequest { user_id } => {
                put_u32_field(&mut fields, F_USER_ID, *user_id);
            }
            FloorBody::QueuePositionInfo { user_id, queued_user_id, position, priority, indicator } => {
                put_u32_field(&mut fields, F_USER_ID, *user_id);
                put_u32_field(&mut fields, F_QUEUED_USER_ID, *queued_user_id);
                fields.put_u8(F_QUEUE_POS_INFO);
                fields.put_u8(2);
                fields.put_u8(*position);
                fields.put_u8(*priority);
                put_u16_field(&mut fields, F_INDICATOR, indicator.0);
            }
            FloorBody::Ack { source, acked } => {
                put_u16_field(&mut fields, F_SOURCE, source.code());
                fields.put_u8(F_MSG_TYPE);
                fields.put_u8(2);
                fields.put_u8(acked.code());
                fields.put_u8(0); // spare
            }
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + fields.len());
        buf.put_u8(self.subtype());
        buf.put_u16(self.call_id);
        buf.put_u32(self.ssrc);
        buf.put_u16(fields.len() as u16);
        buf.put_slice(&fields);
        buf.freeze()
    }

    /// (메시지, 소비한 바이트 수)
    pub fn decode(raw: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut buf = raw;
        ensure(&buf, HEADER_LEN)?;
        let subtype = buf.get_u8();
        let ack_requested = subtype & op::ACK_BIT != 0;
        let kind = FloorKind::from_code(subtype & !op::ACK_BIT)
            .filter(|k| !ack_requested || k.has_ack_variant())
            .ok_or(DecodeError::UnknownType(subtype))?;
        let call_id = buf.get_u16();
        let ssrc    = buf.get_u32();
        let length  = buf.get_u16() as usize;
        ensure(&buf, length)?;

        let mut fields = &buf[..length];
        let body = match kind {
            FloorKind::Request => FloorBody::Request {
                priority:  get_priority(&mut fields)?,
                user_id:   get_u32_field(&mut fields, F_USER_ID)?,
                indicator: Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Granted => FloorBody::Granted {
                duration:   get_u16_field(&mut fields, F_DURATION)?,
                priority:   get_priority(&mut fields)?,
                user_id:    get_u32_field(&mut fields, F_USER_ID)?,
                queue_size: get_u16_field(&mut fields, F_QUEUE_SIZE)?,
                indicator:  Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Taken => FloorBody::Taken {
                granted_party:         get_u32_field(&mut fields, F_GRANTED_PARTY)?,
                permission_to_request: get_u16_field(&mut fields, F_PERM_TO_REQUEST)? != 0,
                user_id:               get_u32_field(&mut fields, F_USER_ID)?,
                seq_num:               get_u16_field(&mut fields, F_SEQ_NUM)?,
                indicator:             Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Deny => FloorBody::Deny {
                cause:     RejectCause::from_code(get_u16_field(&mut fields, F_REJECT_CAUSE)?)?,
                user_id:   get_u32_field(&mut fields, F_USER_ID)?,
                indicator: Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Release => FloorBody::Release {
                user_id:   get_u32_field(&mut fields, F_USER_ID)?,
                indicator: Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Idle => FloorBody::Idle {
                seq_num:   get_u16_field(&mut fields, F_SEQ_NUM)?,
                indicator: Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::Revoke => FloorBody::Revoke {
                cause:     RejectCause::from_code(get_u16_field(&mut fields, F_REJECT_CAUSE)?)?,
                indicator: Indicator(get_u16_field(&mut fields, F_INDICATOR)?),
            },
            FloorKind::QueuePositionRequest => FloorBody::QueuePositionRequest {
                user_id: get_u32_field(&mut fields, F_USER_ID)?,
            },
            FloorKind::QueuePositionInfo => {
                let user_id        = get_u32_field(&mut fields, F_USER_ID)?;
                let queued_user_id = get_u32_field(&mut fields, F_QUEUED_USER_ID)?;
                expect_field(&mut fields, F_QUEUE_POS_INFO, 2, "queue position info")?;
                let position  = fields.get_u8();
                let priority  = fields.get_u8();
                let indicator = Indicator(get_u16_field(&mut fields, F_INDICATOR)?);
                FloorBody::QueuePositionInfo { user_id, queued_user_id, position, priority, indicator }
            }
            FloorKind::Ack => {
                let source = Source::from_code(get_u16_field(&mut fields, F_SOURCE)?)?;
                expect_field(&mut fields, F_MSG_TYPE, 2, "message type")?;
                let code = fields.get_u8();
                fields.advance(1); // spare
                let acked = FloorKind::from_code(code)
                    .ok_or(DecodeError::InvalidValue { field: "message type", value: code as u32 })?;
                FloorBody::Ack { source, acked }
            }
        };

        if fields.has_remaining() {
            return Err(DecodeError::InvalidLength {
                field:    "floor message fields",
                expected: length - fields.remaining(),
                found:    length,
            });
        }

        let msg = FloorMessage { call_id, ssrc, ack_requested, body };
        Ok((msg, HEADER_LEN + length))
    }
}

// ----------------------------------------------------------------------------
// [필드 유틸]
// ----------------------------------------------------------------------------

fn put_u16_field(buf: &mut BytesMut, id: u8, value: u16) {
    buf.put_u8(id);
    buf.put_u8(2);
    buf.put_u16(value);
}

fn put_u32_field(buf: &mut BytesMut, id: u8, value: u32) {
    buf.put_u8(id);
    buf.put_u8(4);
    buf.put_u32(value);
}

fn put_priority(buf: &mut BytesMut, priority: u8) {
    buf.put_u8(F_PRIORITY);
    buf.put_u8(2);
    buf.put_u8(priority);
    buf.put_u8(0); // spare
}

/// id / len 확인 후 value 바이트가 남아있는지까지 검증
fn expect_field(buf: &mut &[u8], id: u8, len: usize, name: &'static str) -> Result<(), DecodeError> {
    let found = get_u8(buf)?;
    if found != id {
        return Err(DecodeError::UnexpectedField { expected: id, found });
    }
    let found_len = get_u8(buf)? as usize;
    if found_len != len {
        return Err(DecodeError::InvalidLength { field: name, expected: len, found: found_len });
    }
    ensure(buf, len)
}

fn get_u16_field(buf: &mut &[u8], id: u8) -> Result<u16, DecodeError> {
    expect_field(buf, id, 2, "u16 field")?;
    get_u16(buf)
}

fn get_u32_field(buf: &mut &[u8], id: u8) -> Result<u32, DecodeError> {
    expect_field(buf, id, 4, "u32 field")?;
    get_u32(buf)
}

fn get_priority(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    expect_field(buf, F_PRIORITY, 2, "priority")?;
    let priority = buf.get_u8();
    buf.advance(1);
    Ok(priority)
}
