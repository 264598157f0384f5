// author: kodeholic (powered by Gemini)

// MCPTT 엔진 에러 분류
//
// 어느 것도 시뮬레이션 전체를 중단시키지 않는다.
// 노드 디스패치 계층에서 로그만 남기고 삼킨다 (ConfigurationError 제외, 생성 시점에 실패).

use thiserror::Error;

/// 코덱 디코딩 실패 원인
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated: need {need} bytes, {have} available")]
    Truncated { need: usize, have: usize },

    #[error("unknown message type code {0}")]
    UnknownType(u8),

    #[error("unexpected field id {found} (expected {expected})")]
    UnexpectedField { expected: u8, found: u8 },

    #[error("invalid length {found} for {field} (expected {expected})")]
    InvalidLength { field: &'static str, expected: usize, found: usize },

    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("invalid SDP: {0}")]
    InvalidSdp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpttError {
    /// 잘린 / 알 수 없는 와이어 데이터, 메시지 drop
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] DecodeError),

    /// 현재 상태에서 정의되지 않은 메시지/동작, 무시
    #[error("invalid transition: {message} in state {state}")]
    InvalidTransition { state: &'static str, message: &'static str },

    #[error("unknown call id {0}")]
    UnknownCall(u16),

    #[error("unknown participant {0}")]
    UnknownParticipant(u32),

    /// 재전송 한도 초과: 관찰 이벤트로만 노출, 호는 계속
    #[error("delivery failure: {message} to user {user_id} after {attempts} attempts")]
    DeliveryFailure { user_id: u32, message: &'static str, attempts: u32 },

    /// 모순된 설정: 호 시작 전 Coordinator 생성 시점에 실패
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("no free call id")]
    CallIdExhausted,
}

pub type McpttResult<T> = Result<T, McpttError>;
