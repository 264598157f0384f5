// author: kodeholic (powered by Claude)
// 음성 미디어 패킷 코덱 (RTP 유사)
//
// 헤더 (12 bytes + CSRC):
//   | V/P/X/CC (1) | M/PT (1) | seq (2) | timestamp (4) | ssrc (4) | csrc x CC |
//   timestamp 단위: 10µs
//
// 페이로드:
//   | payload size (2) | talk spurt start (4, 10µs) | 0 패딩 ... |
//   payload size는 자기 자신과 talk spurt start를 포함한 길이, 최소 6

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::protocol::field::{ensure, get_u16, get_u32, get_u8};

pub const RTP_HEADER_LEN: usize = 12;

/// payload size 필드 + talk spurt start 필드
pub const MIN_PAYLOAD: u16 = 6;

const RTP_VERSION: u8 = 2;

/// millis → 10µs 단위 (u32 wrap)
pub fn to_rtp_units(millis: u64) -> u32 {
    millis.wrapping_mul(100) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMessage {
    pub payload_type:     u8,
    pub seq:              u16,
    /// 송신 시각 (10µs)
    pub timestamp:        u32,
    pub ssrc:             u32,
    /// 이 발언 구간이 시작된 시각 (10µs)
    pub talk_spurt_start: u32,
    pub payload_size:     u16,
}

impl MediaMessage {
    /// payload size는 최소 6으로 올린다
    pub fn new(ssrc: u32, seq: u16, timestamp: u32, talk_spurt_start: u32, payload_size: u16) -> Self {
        Self {
            payload_type: 0,
            seq,
            timestamp,
            ssrc,
            talk_spurt_start,
            payload_size: payload_size.max(MIN_PAYLOAD),
        }
    }

    pub fn name(&self) -> &'static str {
        "Media"
    }

    pub fn encoded_len(&self) -> usize {
        RTP_HEADER_LEN + self.payload_size.max(MIN_PAYLOAD) as usize
    }

    pub fn summary(&self) -> String {
        format!(
            "Media ssrc={} seq={} ts={} spurt={} size={}",
            self.ssrc, self.seq, self.timestamp, self.talk_spurt_start, self.payload_size,
        )
    }

    pub fn encode(&self) -> Bytes {
        let size = self.payload_size.max(MIN_PAYLOAD);
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(self.payload_type & 0x7f);
        buf.put_u16(self.seq);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        buf.put_u16(size);
        buf.put_u32(self.talk_spurt_start);
        buf.put_bytes(0, (size - MIN_PAYLOAD) as usize);
        buf.freeze()
    }

    /// (메시지, 소비한 바이트 수)
    pub fn decode(raw: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut buf = raw;
        let first = get_u8(&mut buf)?;
        if first >> 6 != RTP_VERSION {
            return Err(DecodeError::InvalidValue { field: "rtp version", value: (first >> 6) as u32 });
        }
        let payload_type = get_u8(&mut buf)? & 0x7f;
        let seq = get_u16(&mut buf)?;
        let timestamp = get_u32(&mut buf)?;
        let ssrc = get_u32(&mut buf)?;
        // CSRC 목록은 읽고 버린다
        let csrc_count = (first & 0x0f) as usize;
        ensure(&buf, csrc_count * 4)?;
        buf.advance(csrc_count * 4);

        let payload_size = get_u16(&mut buf)?;
        if payload_size < MIN_PAYLOAD {
            return Err(DecodeError::InvalidLength {
                field:    "media payload",
                expected: MIN_PAYLOAD as usize,
                found:    payload_size as usize,
            });
        }
        let talk_spurt_start = get_u32(&mut buf)?;
        let padding = (payload_size - MIN_PAYLOAD) as usize;
        ensure(&buf, padding)?;
        buf.advance(padding);

        let msg = Self { payload_type, seq, timestamp, ssrc, talk_spurt_start, payload_size };
        Ok((msg, raw.len() - buf.remaining()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rtp_header_then_payload() {
        let msg = MediaMessage::new(0xAABB_CCDD, 7, 300_000, 250_000, 8);
        let raw = msg.encode();
        assert_eq!(raw.len(), 20);
        assert_eq!(raw[0], 0x80);
        assert_eq!(&raw[2..4], &[0, 7]);
        assert_eq!(&raw[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&raw[12..14], &[0, 8]);
        assert_eq!(&raw[18..], &[0, 0]);

        let (back, used) = MediaMessage::decode(&raw).unwrap();
        assert_eq!(back, msg);
        assert_eq!(used, raw.len());
    }

    #[test]
    fn payload_size_floor_is_six() {
        let msg = MediaMessage::new(1, 0, 0, 0, 2);
        assert_eq!(msg.payload_size, MIN_PAYLOAD);
        assert_eq!(msg.encode().len(), RTP_HEADER_LEN + 6);
    }

    #[test]
    fn short_payload_size_rejected() {
        let mut raw = MediaMessage::new(1, 0, 0, 0, 6).encode().to_vec();
        raw[13] = 5;
        assert!(matches!(
            MediaMessage::decode(&raw),
            Err(DecodeError::InvalidLength { found: 5, .. })
        ));
    }

    #[test]
    fn csrc_list_is_skipped() {
        let msg = MediaMessage::new(9, 1, 2, 3, 6);
        let raw = msg.encode();
        let mut with_csrc = raw[..RTP_HEADER_LEN].to_vec();
        with_csrc[0] |= 1;
        with_csrc.extend_from_slice(&[0, 0, 0, 42]);
        with_csrc.extend_from_slice(&raw[RTP_HEADER_LEN..]);
        let (back, used) = MediaMessage::decode(&with_csrc).unwrap();
        assert_eq!(back, msg);
        assert_eq!(used, with_csrc.len());
    }

    #[test]
    fn floor_message_is_not_media() {
        // floor subtype 바이트는 상위 2비트가 0
        assert!(MediaMessage::decode(&[0x01, 0, 0, 0]).is_err());
        let raw = MediaMessage::new(1, 0, 0, 0, 10).encode();
        assert!(matches!(MediaMessage::decode(&raw[..raw.len() - 1]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn millis_to_rtp_units() {
        assert_eq!(to_rtp_units(3_000), 300_000);
    }
}
