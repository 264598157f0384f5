// author: kodeholic (powered by Claude)
// 호 제어 메시지 코덱 (그룹 / 개별 / 긴급 알림)
//
// 레이아웃: | msg type (1) | 타입별 고정 순서 필드 ... |
// GrpAnnoun 끝의 ConfirmMode(80) / ProbeResp(81)는 선택 필드:
// 다음 바이트를 peek 해서 IEI가 맞을 때만 소비한다.

use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::protocol::cause::CallRejectReason;
use crate::protocol::field::{
    get_time, get_type6_str, get_type6_u32, get_u16, get_u8, peek_u8, put_time, put_type6_bytes,
    put_type6_str, put_type6_u32, CallType, CommMode, Type6Text, UserLoc,
};
use crate::protocol::opcode::{call as op, iei};
use crate::protocol::sdp::Sdp;

// ----------------------------------------------------------------------------
// [공통 필드 묶음]
// ----------------------------------------------------------------------------

/// 개별 호 메시지 다수가 공유하는 (call id, caller, callee)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateIds {
    pub call_id:   u16,
    pub caller_id: u32,
    pub callee_id: u32,
}

/// 긴급 알림 Ack / Cancel / CancelAck 공통
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertIds {
    pub grp_id:     u32,
    pub orig_id:    u32,
    pub sending_id: u32,
}

/// 긴급 / 위급 그룹 호 종료 알림 공통
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpEndInfo {
    pub call_id:          u16,
    pub grp_id:           u32,
    pub last_chg_time:    u32,
    pub last_chg_user_id: u32,
    pub user_id:          u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallMessage {
    GrpProbe {
        grp_id: u32,
    },
    GrpAnnoun {
        call_id:          u16,
        call_type:        CallType,
        refresh_interval: u16,
        grp_id:           u32,
        sdp:              Sdp,
        orig_user_id:     u32,
        start_time:       u32,
        last_chg_time:    u32,
        last_chg_user_id: u32,
        confirm_mode:     bool,
        probe_resp:       bool,
    },
    GrpAccept {
        call_id:   u16,
        call_type: CallType,
        grp_id:    u32,
        user_id:   u32,
    },
    GrpEmergEnd(GrpEndInfo),
    GrpImmPerilEnd(GrpEndInfo),
    GrpBroadcast {
        call_id:      u16,
        call_type:    CallType,
        orig_user_id: u32,
        grp_id:       u32,
        sdp:          Sdp,
    },
    GrpBroadcastEnd {
        call_id:      u16,
        grp_id:       u32,
        orig_user_id: u32,
    },
    PrivateSetupReq {
        call_id:   u16,
        comm_mode: CommMode,
        call_type: CallType,
        caller_id: u32,
        callee_id: u32,
        sdp:       Sdp,
        user_loc:  UserLoc,
    },
    PrivateRinging(PrivateIds),
    PrivateAccept {
        ids: PrivateIds,
        sdp: Sdp,
    },
    PrivateReject {
        call_id:   u16,
        reason:    CallRejectReason,
        caller_id: u32,
        callee_id: u32,
    },
    PrivateRelease(PrivateIds),
    PrivateReleaseAck(PrivateIds),
    PrivateAcceptAck(PrivateIds),
    PrivateEmergCancel(PrivateIds),
    PrivateEmergCancelAck(PrivateIds),
    GrpEmergAlert {
        grp_id:   u32,
        user_id:  u32,
        org_name: Type6Text,
        user_loc: UserLoc,
    },
    GrpEmergAlertAck(AlertIds),
    GrpEmergAlertCancel(AlertIds),
    GrpEmergAlertCancelAck(AlertIds),
}

impl CallMessage {
    pub fn code(&self) -> u8 {
        match self {
            CallMessage::GrpProbe { .. }           => op::GRP_PROBE,
            CallMessage::GrpAnnoun { .. }          => op::GRP_ANNOUN,
            CallMessage::GrpAccept { .. }          => op::GRP_ACCEPT,
            CallMessage::GrpEmergEnd(_)            => op::GRP_EMERG_END,
            CallMessage::GrpImmPerilEnd(_)         => op::GRP_IMM_PERIL_END,
            CallMessage::GrpBroadcast { .. }       => op::GRP_BROADCAST,
            CallMessage::GrpBroadcastEnd { .. }    => op::GRP_BROADCAST_END,
            CallMessage::PrivateSetupReq { .. }    => op::PRIVATE_SETUP_REQ,
            CallMessage::PrivateRinging(_)         => op::PRIVATE_RINGING,
            CallMessage::PrivateAccept { .. }      => op::PRIVATE_ACCEPT,
            CallMessage::PrivateReject { .. }      => op::PRIVATE_REJECT,
            CallMessage::PrivateRelease(_)         => op::PRIVATE_RELEASE,
            CallMessage::PrivateReleaseAck(_)      => op::PRIVATE_RELEASE_ACK,
            CallMessage::PrivateAcceptAck(_)       => op::PRIVATE_ACCEPT_ACK,
            CallMessage::PrivateEmergCancel(_)     => op::PRIVATE_EMERG_CANCEL,
            CallMessage::PrivateEmergCancelAck(_)  => op::PRIVATE_EMERG_CANCEL_ACK,
            CallMessage::GrpEmergAlert { .. }      => op::GRP_EMERG_ALERT,
            CallMessage::GrpEmergAlertAck(_)       => op::GRP_EMERG_ALERT_ACK,
            CallMessage::GrpEmergAlertCancel(_)    => op::GRP_EMERG_ALERT_CANCEL,
            CallMessage::GrpEmergAlertCancelAck(_) => op::GRP_EMERG_ALERT_CANCEL_ACK,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallMessage::GrpProbe { .. }           => "GrpProbe",
            CallMessage::GrpAnnoun { .. }          => "GrpAnnoun",
            CallMessage::GrpAccept { .. }          => "GrpAccept",
            CallMessage::GrpEmergEnd(_)            => "GrpEmergEnd",
            CallMessage::GrpImmPerilEnd(_)         => "GrpImmPerilEnd",
            CallMessage::GrpBroadcast { .. }       => "GrpBroadcast",
            CallMessage::GrpBroadcastEnd { .. }    => "GrpBroadcastEnd",
            CallMessage::PrivateSetupReq { .. }    => "PrivateSetupReq",
            CallMessage::PrivateRinging(_)         => "PrivateRinging",
            CallMessage::PrivateAccept { .. }      => "PrivateAccept",
            CallMessage::PrivateReject { .. }      => "PrivateReject",
            CallMessage::PrivateRelease(_)         => "PrivateRelease",
            CallMessage::PrivateReleaseAck(_)      => "PrivateReleaseAck",
            CallMessage::PrivateAcceptAck(_)       => "PrivateAcceptAck",
            CallMessage::PrivateEmergCancel(_)     => "PrivateEmergCancel",
            CallMessage::PrivateEmergCancelAck(_)  => "PrivateEmergCancelAck",
            CallMessage::GrpEmergAlert { .. }      => "GrpEmergAlert",
            CallMessage::GrpEmergAlertAck(_)       => "GrpEmergAlertAck",
            CallMessage::GrpEmergAlertCancel(_)    => "GrpEmergAlertCancel",
            CallMessage::GrpEmergAlertCancelAck(_) => "GrpEmergAlertCancelAck",
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.code());
        match self {
            CallMessage::GrpProbe { grp_id } => {
                put_type6_u32(&mut buf, *grp_id);
            }
            CallMessage::GrpAnnoun {
                call_id, call_type, refresh_interval, grp_id, sdp, orig_user_id,
                start_time, last_chg_time, last_chg_user_id, confirm_mode, probe_resp,
            } => {
                buf.put_u16(*call_id);
                buf.put_u8(call_type.code());
                buf.put_u16(*refresh_interval);
                put_type6_u32(&mut buf, *grp_id);
                put_sdp(&mut buf, sdp);
                put_type6_u32(&mut buf, *orig_user_id);
                put_time(&mut buf, *start_time);
                put_time(&mut buf, *last_chg_time);
                put_type6_u32(&mut buf, *last_chg_user_id);
                if *confirm_mode {
                    buf.put_u8(iei::CONFIRM_MODE);
                }
                if *probe_resp {
                    buf.put_u8(iei::PROBE_RESP);
                }
            }
            CallMessage::GrpAccept { call_id, call_type, grp_id, user_id } => {
                buf.put_u16(*call_id);
                buf.put_u8(call_type.code());
                put_type6_u32(&mut buf, *grp_id);
                put_type6_u32(&mut buf, *user_id);
            }
            CallMessage::GrpEmergEnd(info) | CallMessage::GrpImmPerilEnd(info) => {
                buf.put_u16(info.call_id);
                put_type6_u32(&mut buf, info.grp_id);
                put_time(&mut buf, info.last_chg_time);
                put_type6_u32(&mut buf, info.last_chg_user_id);
                put_type6_u32(&mut buf, info.user_id);
            }
            CallMessage::GrpBroadcast { call_id, call_type, orig_user_id, grp_id, sdp } => {
                buf.put_u16(*call_id);
                buf.put_u8(call_type.code());
                put_type6_u32(&mut buf, *orig_user_id);
                put_type6_u32(&mut buf, *grp_id);
                put_sdp(&mut buf, sdp);
            }
            CallMessage::GrpBroadcastEnd { call_id, grp_id, orig_user_id } => {
                buf.put_u16(*call_id);
                put_type6_u32(&mut buf, *grp_id);
                put_type6_u32(&mut buf, *orig_user_id);
            }
            CallMessage::PrivateSetupReq { call_id, comm_mode, call_type, caller_id, callee_id, sdp, user_loc } => {
                buf.put_u16(*call_id);
                buf.put_u8(comm_mode.code());
                buf.put_u8(call_type.code());
                put_type6_u32(&mut buf, *caller_id);
                put_type6_u32(&mut buf, *callee_id);
                put_sdp(&mut buf, sdp);
                user_loc.encode(&mut buf);
            }
            CallMessage::PrivateRinging(ids)
            | CallMessage::PrivateRelease(ids)
            | CallMessage::PrivateReleaseAck(ids)
            | CallMessage::PrivateAcceptAck(ids)
            | CallMessage::PrivateEmergCancel(ids)
            | CallMessage::PrivateEmergCancelAck(ids) => {
                put_private_ids(&mut buf, ids);
            }
            CallMessage::PrivateAccept { ids, sdp } => {
                put_private_ids(&mut buf, ids);
                put_sdp(&mut buf, sdp);
            }
            CallMessage::PrivateReject { call_id, reason, caller_id, callee_id } => {
                buf.put_u16(*call_id);
                buf.put_u8(reason.code());
                put_type6_u32(&mut buf, *caller_id);
                put_type6_u32(&mut buf, *callee_id);
            }
            CallMessage::GrpEmergAlert { grp_id, user_id, org_name, user_loc } => {
                put_type6_u32(&mut buf, *grp_id);
                put_type6_u32(&mut buf, *user_id);
                put_type6_str(&mut buf, org_name);
                user_loc.encode(&mut buf);
            }
            CallMessage::GrpEmergAlertAck(ids)
            | CallMessage::GrpEmergAlertCancel(ids)
            | CallMessage::GrpEmergAlertCancelAck(ids) => {
                put_type6_u32(&mut buf, ids.grp_id);
                put_type6_u32(&mut buf, ids.orig_id);
                put_type6_u32(&mut buf, ids.sending_id);
            }
        }
        buf.freeze()
    }

    /// (메시지, 소비한 바이트 수)
    pub fn decode(raw: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut buf = raw;
        let code = get_u8(&mut buf)?;
        let msg = match code {
            op::GRP_PROBE => CallMessage::GrpProbe {
                grp_id: get_type6_u32(&mut buf, "grp id")?,
            },
            op::GRP_ANNOUN => {
                let call_id          = get_u16(&mut buf)?;
                let call_type        = CallType::from_code(get_u8(&mut buf)?)?;
                let refresh_interval = get_u16(&mut buf)?;
                let grp_id           = get_type6_u32(&mut buf, "grp id")?;
                let sdp              = get_sdp(&mut buf)?;
                let orig_user_id     = get_type6_u32(&mut buf, "orig user id")?;
                let start_time       = get_time(&mut buf)?;
                let last_chg_time    = get_time(&mut buf)?;
                let last_chg_user_id = get_type6_u32(&mut buf, "last chg user id")?;
                let confirm_mode     = take_iei(&mut buf, iei::CONFIRM_MODE);
                let probe_resp       = take_iei(&mut buf, iei::PROBE_RESP);
                CallMessage::GrpAnnoun {
                    call_id, call_type, refresh_interval, grp_id, sdp, orig_user_id,
                    start_time, last_chg_time, last_chg_user_id, confirm_mode, probe_resp,
                }
            }
            op::GRP_ACCEPT => CallMessage::GrpAccept {
                call_id:   get_u16(&mut buf)?,
                call_type: CallType::from_code(get_u8(&mut buf)?)?,
                grp_id:    get_type6_u32(&mut buf, "grp id")?,
                user_id:   get_type6_u32(&mut buf, "user id")?,
            },
            op::GRP_EMERG_END     => CallMessage::GrpEmergEnd(get_grp_end(&mut buf)?),
            op::GRP_IMM_PERIL_END => CallMessage::GrpImmPerilEnd(get_grp_end(&mut buf)?),
            op::GRP_BROADCAST => CallMessage::GrpBroadcast {
                call_id:      get_u16(&mut buf)?,
                call_type:    CallType::from_code(get_u8(&mut buf)?)?,
                orig_user_id: get_type6_u32(&mut buf, "orig user id")?,
                grp_id:       get_type6_u32(&mut buf, "grp id")?,
                sdp:          get_sdp(&mut buf)?,
            },
            op::GRP_BROADCAST_END => CallMessage::GrpBroadcastEnd {
                call_id:      get_u16(&mut buf)?,
                grp_id:       get_type6_u32(&mut buf, "grp id")?,
                orig_user_id: get_type6_u32(&mut buf, "orig user id")?,
            },
            op::PRIVATE_SETUP_REQ => CallMessage::PrivateSetupReq {
                call_id:   get_u16(&mut buf)?,
                comm_mode: CommMode::from_code(get_u8(&mut buf)?)?,
                call_type: CallType::from_code(get_u8(&mut buf)?)?,
                caller_id: get_type6_u32(&mut buf, "caller id")?,
                callee_id: get_type6_u32(&mut buf, "callee id")?,
                sdp:       get_sdp(&mut buf)?,
                user_loc:  UserLoc::decode(&mut buf)?,
            },
            op::PRIVATE_RINGING  => CallMessage::PrivateRinging(get_private_ids(&mut buf)?),
            op::PRIVATE_ACCEPT => CallMessage::PrivateAccept {
                ids: get_private_ids(&mut buf)?,
                sdp: get_sdp(&mut buf)?,
            },
            op::PRIVATE_REJECT => CallMessage::PrivateReject {
                call_id:   get_u16(&mut buf)?,
                reason:    CallRejectReason::from_code(get_u8(&mut buf)?)?,
                caller_id: get_type6_u32(&mut buf, "caller id")?,
                callee_id: get_type6_u32(&mut buf, "callee id")?,
            },
            op::PRIVATE_RELEASE          => CallMessage::PrivateRelease(get_private_ids(&mut buf)?),
            op::PRIVATE_RELEASE_ACK      => CallMessage::PrivateReleaseAck(get_private_ids(&mut buf)?),
            op::PRIVATE_ACCEPT_ACK       => CallMessage::PrivateAcceptAck(get_private_ids(&mut buf)?),
            op::PRIVATE_EMERG_CANCEL     => CallMessage::PrivateEmergCancel(get_private_ids(&mut buf)?),
            op::PRIVATE_EMERG_CANCEL_ACK => CallMessage::PrivateEmergCancelAck(get_private_ids(&mut buf)?),
            op::GRP_EMERG_ALERT => CallMessage::GrpEmergAlert {
                grp_id:   get_type6_u32(&mut buf, "grp id")?,
                user_id:  get_type6_u32(&mut buf, "user id")?,
                org_name: get_type6_str(&mut buf, "org name")?,
                user_loc: UserLoc::decode(&mut buf)?,
            },
            op::GRP_EMERG_ALERT_ACK        => CallMessage::GrpEmergAlertAck(get_alert_ids(&mut buf)?),
            op::GRP_EMERG_ALERT_CANCEL     => CallMessage::GrpEmergAlertCancel(get_alert_ids(&mut buf)?),
            op::GRP_EMERG_ALERT_CANCEL_ACK => CallMessage::GrpEmergAlertCancelAck(get_alert_ids(&mut buf)?),
            other => return Err(DecodeError::UnknownType(other)),
        };
        Ok((msg, raw.len() - buf.remaining()))
    }
}

// ----------------------------------------------------------------------------
// [필드 유틸] session.rs 와 공유
// ----------------------------------------------------------------------------

/// SDP 텍스트는 주소 두 개와 포트 두 개뿐이라 Type6 길이 상한에 한참 못 미친다
pub(crate) fn put_sdp(buf: &mut BytesMut, sdp: &Sdp) {
    put_type6_bytes(buf, sdp.to_string().as_bytes());
}

pub(crate) fn get_sdp(buf: &mut &[u8]) -> Result<Sdp, DecodeError> {
    let text = get_type6_str(buf, "sdp")?;
    Sdp::from_str(text.as_str())
}

/// 선택 IEI: 다음 바이트가 일치할 때만 소비
fn take_iei(buf: &mut &[u8], id: u8) -> bool {
    if peek_u8(&*buf) == Some(id) {
        buf.advance(1);
        true
    } else {
        false
    }
}

fn put_private_ids(buf: &mut BytesMut, ids: &PrivateIds) {
    buf.put_u16(ids.call_id);
    put_type6_u32(buf, ids.caller_id);
    put_type6_u32(buf, ids.callee_id);
}

fn get_private_ids(buf: &mut &[u8]) -> Result<PrivateIds, DecodeError> {
    Ok(PrivateIds {
        call_id:   get_u16(buf)?,
        caller_id: get_type6_u32(buf, "caller id")?,
        callee_id: get_type6_u32(buf, "callee id")?,
    })
}

fn get_alert_ids(buf: &mut &[u8]) -> Result<AlertIds, DecodeError> {
    Ok(AlertIds {
        grp_id:     get_type6_u32(buf, "grp id")?,
        orig_id:    get_type6_u32(buf, "orig id")?,
        sending_id: get_type6_u32(buf, "sending id")?,
    })
}

fn get_grp_end(buf: &mut &[u8]) -> Result<GrpEndInfo, DecodeError> {
    Ok(GrpEndInfo {
        call_id:          get_u16(buf)?,
        grp_id:           get_type6_u32(buf, "grp id")?,
        last_chg_time:    get_time(buf)?,
        last_chg_user_id: get_type6_u32(buf, "last chg user id")?,
        user_id:          get_type6_u32(buf, "user id")?,
    })
}
