// author: kodeholic (powered by Claude)
// 세션 제어 메시지 (INVITE / 응답 / BYE 대응)
//
// 제어 포트(5060)로 오가며, 호 제어 메시지와 같은 필드 코덱을 쓴다.
//   Invite   : CallId, CallType, GrpId, From, Sdp
//   Response : CallId, Status(u16), From, SdpFlag(u8) [, Sdp]
//   Bye      : CallId, From
//   Update   : CallId, From, UserLoc  (응답 없음)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::protocol::call_msg::{get_sdp, put_sdp};
use crate::protocol::field::{get_type6_u32, get_u16, get_u8, put_type6_u32, CallType, UserLoc};
use crate::protocol::opcode::session as op;
use crate::protocol::sdp::Sdp;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Invite {
        call_id:   u16,
        call_type: CallType,
        grp_id:    u32,
        from:      u32,
        sdp:       Sdp,
    },
    Response {
        call_id: u16,
        status:  u16,
        from:    u32,
        sdp:     Option<Sdp>,
    },
    Bye {
        call_id: u16,
        from:    u32,
    },
    Update {
        call_id:  u16,
        from:     u32,
        location: UserLoc,
    },
}

impl SessionMessage {
    pub fn call_id(&self) -> u16 {
        match self {
            SessionMessage::Invite { call_id, .. }
            | SessionMessage::Response { call_id, .. }
            | SessionMessage::Bye { call_id, .. }
            | SessionMessage::Update { call_id, .. } => *call_id,
        }
    }

    pub fn from(&self) -> u32 {
        match self {
            SessionMessage::Invite { from, .. }
            | SessionMessage::Response { from, .. }
            | SessionMessage::Bye { from, .. }
            | SessionMessage::Update { from, .. } => *from,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionMessage::Invite { .. } => "Invite",
            SessionMessage::Response { status, .. } => match *status {
                op::STATUS_TRYING       => "100 Trying",
                op::STATUS_OK           => "200 OK",
                op::STATUS_NO_SUCH_CALL => "481 NoSuchCall",
                op::STATUS_BUSY         => "486 Busy",
                _                       => "Response",
            },
            SessionMessage::Bye { .. } => "Bye",
            SessionMessage::Update { .. } => "Update",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            SessionMessage::Invite { call_id, call_type, grp_id, from, .. } => {
                format!("Invite call={} type={} grp={} from={}", call_id, call_type.name(), grp_id, from)
            }
            SessionMessage::Response { call_id, from, .. } => {
                format!("{} call={} from={}", self.name(), call_id, from)
            }
            SessionMessage::Bye { call_id, from } => format!("Bye call={} from={}", call_id, from),
            SessionMessage::Update { call_id, from, location } => format!(
                "Update call={} from={} loc=({:.1},{:.1},{:.1})",
                call_id, from, location.x, location.y, location.z,
            ),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(160);
        match self {
            SessionMessage::Invite { call_id, call_type, grp_id, from, sdp } => {
                buf.put_u8(op::INVITE);
                buf.put_u16(*call_id);
                buf.put_u8(call_type.code());
                put_type6_u32(&mut buf, *grp_id);
                put_type6_u32(&mut buf, *from);
                put_sdp(&mut buf, sdp);
            }
            SessionMessage::Response { call_id, status, from, sdp } => {
                buf.put_u8(op::RESPONSE);
                buf.put_u16(*call_id);
                buf.put_u16(*status);
                put_type6_u32(&mut buf, *from);
                match sdp {
                    Some(sdp) => {
                        buf.put_u8(1);
                        put_sdp(&mut buf, sdp);
                    }
                    None => buf.put_u8(0),
                }
            }
            SessionMessage::Bye { call_id, from } => {
                buf.put_u8(op::BYE);
                buf.put_u16(*call_id);
                put_type6_u32(&mut buf, *from);
            }
            SessionMessage::Update { call_id, from, location } => {
                buf.put_u8(op::UPDATE);
                buf.put_u16(*call_id);
                put_type6_u32(&mut buf, *from);
                location.encode(&mut buf);
            }
        }
        buf.freeze()
    }

    pub fn decode(raw: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut buf = raw;
        let code = get_u8(&mut buf)?;
        let msg = match code {
            op::INVITE => SessionMessage::Invite {
                call_id:   get_u16(&mut buf)?,
                call_type: CallType::from_code(get_u8(&mut buf)?)?,
                grp_id:    get_type6_u32(&mut buf, "grp id")?,
                from:      get_type6_u32(&mut buf, "from")?,
                sdp:       get_sdp(&mut buf)?,
            },
            op::RESPONSE => {
                let call_id = get_u16(&mut buf)?;
                let status  = get_u16(&mut buf)?;
                let from    = get_type6_u32(&mut buf, "from")?;
                let sdp = match get_u8(&mut buf)? {
                    0 => None,
                    1 => Some(get_sdp(&mut buf)?),
                    v => return Err(DecodeError::InvalidValue { field: "sdp flag", value: v as u32 }),
                };
                SessionMessage::Response { call_id, status, from, sdp }
            }
            op::BYE => SessionMessage::Bye {
                call_id: get_u16(&mut buf)?,
                from:    get_type6_u32(&mut buf, "from")?,
            },
            op::UPDATE => SessionMessage::Update {
                call_id:  get_u16(&mut buf)?,
                from:     get_type6_u32(&mut buf, "from")?,
                location: UserLoc::decode(&mut buf)?,
            },
            other => return Err(DecodeError::UnknownType(other)),
        };
        Ok((msg, raw.len() - buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sdp() -> Sdp {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Sdp::new(ip, ip, 49151, 49150)
    }

    #[test]
    fn invite_round_trip() {
        let msg = SessionMessage::Invite {
            call_id:   3,
            call_type: CallType::BasicGroup,
            grp_id:    1,
            from:      2,
            sdp:       sdp(),
        };
        let raw = msg.encode();
        assert_eq!(raw[0], op::INVITE);
        let (back, used) = SessionMessage::decode(&raw).unwrap();
        assert_eq!(back, msg);
        assert_eq!(used, raw.len());
    }

    #[test]
    fn response_with_and_without_sdp() {
        let trying = SessionMessage::Response { call_id: 3, status: op::STATUS_TRYING, from: 0, sdp: None };
        let ok = SessionMessage::Response { call_id: 3, status: op::STATUS_OK, from: 0, sdp: Some(sdp()) };
        assert_eq!(SessionMessage::decode(&trying.encode()).unwrap().0, trying);
        assert_eq!(SessionMessage::decode(&ok.encode()).unwrap().0, ok);
        assert_eq!(ok.name(), "200 OK");
    }

    #[test]
    fn update_carries_location() {
        let msg = SessionMessage::Update { call_id: 3, from: 2, location: UserLoc::new(10.0, 20.5, 1.0) };
        let raw = msg.encode();
        assert_eq!(raw[0], op::UPDATE);
        assert_eq!(raw.len(), 1 + 2 + 6 + 27);
        let (back, used) = SessionMessage::decode(&raw).unwrap();
        assert_eq!(back, msg);
        assert_eq!(used, raw.len());
        assert_eq!(msg.summary(), "Update call=3 from=2 loc=(10.0,20.5,1.0)");
    }

    #[test]
    fn floor_code_is_not_a_session_message() {
        assert_eq!(SessionMessage::decode(&[1]).unwrap_err(), DecodeError::UnknownType(1));
    }
}
