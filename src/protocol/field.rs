// author: kodeholic (powered by Gemini)
// 와이어 필드 공통 코덱
//
// 모든 다바이트 정수는 big-endian.
// Type6 필드: u16 길이 + 내용 (user id / group id는 항상 길이 4)
// StartTime / LastChgTime: u32 millis + 더미 1바이트 (쓰기 0, 읽기 버림)
// UserLoc: IEI(78) + u16 길이(24) + f64 x3, native byte order (이식성 없음, 알려진 제약)
//
// bytes::Buf의 get_* 는 부족하면 panic 하므로 항상 ensure() 로 먼저 확인한다.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::error::DecodeError;
use crate::protocol::opcode::iei;

pub fn ensure(buf: &impl Buf, need: usize) -> Result<(), DecodeError> {
    if buf.remaining() < need {
        return Err(DecodeError::Truncated { need, have: buf.remaining() });
    }
    Ok(())
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8, DecodeError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut impl Buf) -> Result<u16, DecodeError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

/// 소비하지 않고 다음 바이트 확인 (선택적 IEI 판별용)
pub fn peek_u8(buf: &impl Buf) -> Option<u8> {
    buf.chunk().first().copied()
}

// ----------------------------------------------------------------------------
// [Type6]
// ----------------------------------------------------------------------------

pub fn put_type6_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u16(4);
    buf.put_u32(value);
}

pub fn get_type6_u32(buf: &mut impl Buf, field: &'static str) -> Result<u32, DecodeError> {
    let len = get_u16(buf)? as usize;
    if len != 4 {
        return Err(DecodeError::InvalidLength { field, expected: 4, found: len });
    }
    get_u32(buf)
}

/// Type6 문자열 필드: 길이가 u16에 들어가는 UTF-8 텍스트
///
/// 생성 시점에 길이를 검사하므로 인코딩은 실패하지 않는다.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Type6Text(String);

impl Type6Text {
    pub const MAX_LEN: usize = u16::MAX as usize;

    pub fn new(value: impl Into<String>) -> Result<Self, DecodeError> {
        let value = value.into();
        if value.len() > Self::MAX_LEN {
            return Err(DecodeError::InvalidLength { field: "type6 text", expected: Self::MAX_LEN, found: value.len() });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for Type6Text {
    type Error = DecodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::fmt::Display for Type6Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn put_type6_str(buf: &mut BytesMut, value: &Type6Text) {
    put_type6_bytes(buf, value.as_str().as_bytes());
}

/// 길이 상한은 호출자가 보장 (짧은 고정 형식 텍스트 전용)
pub(crate) fn put_type6_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    debug_assert!(bytes.len() <= Type6Text::MAX_LEN);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

pub fn get_type6_str(buf: &mut impl Buf, field: &'static str) -> Result<Type6Text, DecodeError> {
    let len = get_u16(buf)? as usize;
    ensure(buf, len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map(Type6Text)
        .map_err(|_| DecodeError::InvalidValue { field, value: len as u32 })
}

// ----------------------------------------------------------------------------
// [시각 필드] StartTime / LastChgTime
// ----------------------------------------------------------------------------

pub fn put_time(buf: &mut BytesMut, millis: u32) {
    buf.put_u32(millis);
    buf.put_u8(0); // 더미 바이트
}

pub fn get_time(buf: &mut impl Buf) -> Result<u32, DecodeError> {
    ensure(buf, 5)?;
    let millis = buf.get_u32();
    buf.advance(1);
    Ok(millis)
}

// ----------------------------------------------------------------------------
// [UserLoc]
// ----------------------------------------------------------------------------

const USER_LOC_LEN: usize = 24;

/// 단말 위치 (x, y, z)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct UserLoc {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl UserLoc {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(iei::USER_LOC);
        buf.put_u16(USER_LOC_LEN as u16);
        buf.put_slice(&self.x.to_ne_bytes());
        buf.put_slice(&self.y.to_ne_bytes());
        buf.put_slice(&self.z.to_ne_bytes());
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let id = get_u8(buf)?;
        if id != iei::USER_LOC {
            return Err(DecodeError::UnexpectedField { expected: iei::USER_LOC, found: id });
        }
        let len = get_u16(buf)? as usize;
        if len != USER_LOC_LEN {
            return Err(DecodeError::InvalidLength { field: "user location", expected: USER_LOC_LEN, found: len });
        }
        ensure(buf, USER_LOC_LEN)?;
        let mut read = || {
            let mut raw = [0u8; 8];
            buf.copy_to_slice(&mut raw);
            f64::from_ne_bytes(raw)
        };
        let x = read();
        let y = read();
        let z = read();
        Ok(Self { x, y, z })
    }
}

// ----------------------------------------------------------------------------
// [호 타입 / 통신 모드]
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallType {
    BasicGroup,
    Broadcast,
    EmergencyGroup,
    ImminentPeril,
    Private,
    EmergencyPrivate,
}

impl CallType {
    pub fn code(self) -> u8 {
        match self {
            CallType::BasicGroup       => 1,
            CallType::Broadcast        => 2,
            CallType::EmergencyGroup   => 3,
            CallType::ImminentPeril    => 4,
            CallType::Private          => 5,
            CallType::EmergencyPrivate => 6,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        Ok(match code {
            1 => CallType::BasicGroup,
            2 => CallType::Broadcast,
            3 => CallType::EmergencyGroup,
            4 => CallType::ImminentPeril,
            5 => CallType::Private,
            6 => CallType::EmergencyPrivate,
            _ => return Err(DecodeError::InvalidValue { field: "call type", value: code as u32 }),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CallType::BasicGroup       => "BasicGroup",
            CallType::Broadcast        => "Broadcast",
            CallType::EmergencyGroup   => "EmergencyGroup",
            CallType::ImminentPeril    => "ImminentPeril",
            CallType::Private          => "Private",
            CallType::EmergencyPrivate => "EmergencyPrivate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommMode {
    Automatic,
    Manual,
}

impl CommMode {
    pub fn code(self) -> u8 {
        match self {
            CommMode::Automatic => 0,
            CommMode::Manual    => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(CommMode::Automatic),
            1 => Ok(CommMode::Manual),
            _ => Err(DecodeError::InvalidValue { field: "comm mode", value: code as u32 }),
        }
    }
}

// ----------------------------------------------------------------------------
// [Floor Indicator] u16 비트 플래그
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Indicator(pub u16);

impl Indicator {
    pub const NORMAL:          u16 = 0x8000;
    pub const BROADCAST:       u16 = 0x4000;
    pub const SYSTEM:          u16 = 0x2000;
    pub const EMERGENCY:       u16 = 0x1000;
    pub const IMMINENT_PERIL:  u16 = 0x0800;
    pub const QUEUEING:        u16 = 0x0400;
    pub const DUAL_FLOOR:      u16 = 0x0200;
    pub const TEMPORARY_GROUP: u16 = 0x0100;

    pub fn normal() -> Self {
        Indicator(Self::NORMAL)
    }

    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    pub fn with(self, bits: u16) -> Self {
        Indicator(self.0 | bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type6_u32_layout() {
        let mut buf = BytesMut::new();
        put_type6_u32(&mut buf, 0x0102_0304);
        assert_eq!(&buf[..], &[0, 4, 1, 2, 3, 4]);
        let mut rd = &buf[..];
        assert_eq!(get_type6_u32(&mut rd, "grp id").unwrap(), 0x0102_0304);
    }

    #[test]
    fn type6_wrong_length_rejected() {
        let raw = [0u8, 3, 1, 2, 3];
        let mut rd = &raw[..];
        assert!(matches!(
            get_type6_u32(&mut rd, "user id"),
            Err(DecodeError::InvalidLength { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn oversized_type6_text_rejected_at_construction() {
        let long = "가".repeat(Type6Text::MAX_LEN / 3 + 1);
        assert!(long.len() > Type6Text::MAX_LEN);
        assert!(matches!(
            Type6Text::new(long),
            Err(DecodeError::InvalidLength { expected: 65_535, found: 65_538, .. })
        ));
        assert!(Type6Text::new("x".repeat(Type6Text::MAX_LEN)).is_ok());
    }

    #[test]
    fn multibyte_type6_text_keeps_whole_characters() {
        let text = Type6Text::new("소방 119 · 구조대").unwrap();
        let mut buf = BytesMut::new();
        put_type6_str(&mut buf, &text);
        assert_eq!(&buf[..2], &(text.as_str().len() as u16).to_be_bytes());
        let mut rd = &buf[..];
        assert_eq!(get_type6_str(&mut rd, "org name").unwrap(), text);
        assert_eq!(rd.remaining(), 0);
    }

    #[test]
    fn time_field_has_dummy_byte() {
        let mut buf = BytesMut::new();
        put_time(&mut buf, 3_000);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[4], 0);
        // 더미 바이트 값은 무시
        let raw = [0u8, 0, 0x0b, 0xb8, 0xff];
        let mut rd = &raw[..];
        assert_eq!(get_time(&mut rd).unwrap(), 3_000);
        assert_eq!(rd.remaining(), 0);
    }

    #[test]
    fn user_loc_layout() {
        let loc = UserLoc::new(1.5, -2.0, 30.25);
        let mut buf = BytesMut::new();
        loc.encode(&mut buf);
        assert_eq!(buf.len(), 27);
        assert_eq!(buf[0], 78);
        assert_eq!(&buf[1..3], &[0, 24]);
        assert_eq!(&buf[3..11], &1.5f64.to_ne_bytes());
        let mut rd = &buf[..];
        assert_eq!(UserLoc::decode(&mut rd).unwrap(), loc);
    }

    #[test]
    fn truncated_read_is_error_not_panic() {
        let raw = [0u8];
        let mut rd = &raw[..];
        assert_eq!(get_u32(&mut rd), Err(DecodeError::Truncated { need: 4, have: 1 }));
    }

    #[test]
    fn indicator_bits() {
        let ind = Indicator::normal().with(Indicator::EMERGENCY);
        assert!(ind.contains(Indicator::NORMAL));
        assert!(ind.contains(Indicator::EMERGENCY));
        assert!(!ind.contains(Indicator::BROADCAST));
    }
}
