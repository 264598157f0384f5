// author: kodeholic (powered by Claude)

use serde::Serialize;

use crate::error::DecodeError;

/// Floor Deny / Revoke 사유 (Reject Cause 필드)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectCause {
    /// 1: 다른 참가자가 발언 중 (BUSY)
    AnotherClientHasPermission,
    /// 2: 내부 오류 / 최대 발언 시간 초과
    InternalError,
    /// 3: 호에 참가자가 혼자
    OnlyOneParticipant,
    /// 4: 더 높은 우선순위 요청에 의한 회수
    RetryAfterTimer,
    /// 5: 수신 전용
    ReceiveOnly,
    /// 6
    NoResources,
    /// 7: 대기열 가득 참
    QueueFull,
    /// 255
    Other,
}

/// BUSY 별칭
pub const BUSY: RejectCause = RejectCause::AnotherClientHasPermission;

impl RejectCause {
    pub fn code(self) -> u16 {
        match self {
            RejectCause::AnotherClientHasPermission => 1,
            RejectCause::InternalError              => 2,
            RejectCause::OnlyOneParticipant         => 3,
            RejectCause::RetryAfterTimer            => 4,
            RejectCause::ReceiveOnly                => 5,
            RejectCause::NoResources                => 6,
            RejectCause::QueueFull                  => 7,
            RejectCause::Other                      => 255,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, DecodeError> {
        Ok(match code {
            1   => RejectCause::AnotherClientHasPermission,
            2   => RejectCause::InternalError,
            3   => RejectCause::OnlyOneParticipant,
            4   => RejectCause::RetryAfterTimer,
            5   => RejectCause::ReceiveOnly,
            6   => RejectCause::NoResources,
            7   => RejectCause::QueueFull,
            255 => RejectCause::Other,
            _   => return Err(DecodeError::InvalidValue { field: "reject cause", value: code as u32 }),
        })
    }
}

/// 개별 호 거절 사유 (PrivateReject)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRejectReason {
    Reject,
    NoAnswer,
    Busy,
    SecurityFailure,
    Failed,
}

impl CallRejectReason {
    pub fn code(self) -> u8 {
        match self {
            CallRejectReason::Reject          => 0,
            CallRejectReason::NoAnswer        => 1,
            CallRejectReason::Busy            => 2,
            CallRejectReason::SecurityFailure => 3,
            CallRejectReason::Failed          => 4,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        Ok(match code {
            0 => CallRejectReason::Reject,
            1 => CallRejectReason::NoAnswer,
            2 => CallRejectReason::Busy,
            3 => CallRejectReason::SecurityFailure,
            4 => CallRejectReason::Failed,
            _ => return Err(DecodeError::InvalidValue { field: "reject reason", value: code as u32 }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_cause_one() {
        assert_eq!(BUSY.code(), 1);
        assert_eq!(RejectCause::from_code(1).unwrap(), BUSY);
    }

    #[test]
    fn unknown_cause_rejected() {
        assert!(RejectCause::from_code(8).is_err());
        assert!(CallRejectReason::from_code(5).is_err());
    }
}
