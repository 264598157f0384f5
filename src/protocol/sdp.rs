// author: kodeholic (powered by Claude)

// MCPTT 세션 기술(SDP) 필드
//
// 고정 문법, 상호운용 테스트용으로 토큰 단위까지 그대로 재현:
//   v=0;o=- 0 0 IN <type> <addr>;s=-;c=IN <type> <addr>/255;
//   m=audio <port> RTP/AVP 0;i=speech;m=application <port> udp MCPTT;a=fmtp:MCPTT;
//
// <type>은 IP4 / IP6, 주소 종류에서 결정된다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    /// o= 발신 주소
    pub origin:      IpAddr,
    /// c= 그룹(미디어/floor 목적지) 주소
    pub group:       IpAddr,
    /// m=audio 포트
    pub speech_port: u16,
    /// m=application 포트 (floor control)
    pub floor_port:  u16,
}

fn addr_type(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

impl Sdp {
    pub fn new(origin: IpAddr, group: IpAddr, speech_port: u16, floor_port: u16) -> Self {
        Self { origin, group, speech_port, floor_port }
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v=0;o=- 0 0 IN {} {};s=-;c=IN {} {}/255;m=audio {} RTP/AVP 0;i=speech;m=application {} udp MCPTT;a=fmtp:MCPTT;",
            addr_type(&self.origin), self.origin,
            addr_type(&self.group), self.group,
            self.speech_port,
            self.floor_port,
        )
    }
}

fn invalid(msg: impl Into<String>) -> DecodeError {
    DecodeError::InvalidSdp(msg.into())
}

/// "IN <type> <addr>" 파싱, type과 주소 종류 일치 확인
fn parse_net(rest: &str, line: &str) -> Result<IpAddr, DecodeError> {
    let parts: Vec<&str> = rest.split(' ').collect();
    match parts.as_slice() {
        ["IN", ty, addr] => {
            let ip = IpAddr::from_str(addr).map_err(|_| invalid(format!("bad address in '{}'", line)))?;
            if addr_type(&ip) != *ty {
                return Err(invalid(format!("address type mismatch in '{}'", line)));
            }
            Ok(ip)
        }
        _ => Err(invalid(format!("bad address line '{}'", line))),
    }
}

fn parse_port(raw: &str, line: &str) -> Result<u16, DecodeError> {
    raw.parse::<u16>().map_err(|_| invalid(format!("bad port in '{}'", line)))
}

impl FromStr for Sdp {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lines: Vec<&str> = s.split(';').collect();
        // 마지막 ';' 뒤 빈 토큰 포함 9개
        if lines.len() != 9 || !lines[8].is_empty() {
            return Err(invalid(format!("expected 8 ';'-terminated lines, got '{}'", s)));
        }

        if lines[0] != "v=0" {
            return Err(invalid(format!("bad version line '{}'", lines[0])));
        }

        let origin = match lines[1].strip_prefix("o=- 0 0 ") {
            Some(rest) => parse_net(rest, lines[1])?,
            None       => return Err(invalid(format!("bad origin line '{}'", lines[1]))),
        };

        if lines[2] != "s=-" {
            return Err(invalid(format!("bad session line '{}'", lines[2])));
        }

        let group = match lines[3].strip_prefix("c=").and_then(|r| r.strip_suffix("/255")) {
            Some(rest) => parse_net(rest, lines[3])?,
            None       => return Err(invalid(format!("bad connection line '{}'", lines[3]))),
        };

        let speech_port = match lines[4].strip_prefix("m=audio ").and_then(|r| r.strip_suffix(" RTP/AVP 0")) {
            Some(port) => parse_port(port, lines[4])?,
            None       => return Err(invalid(format!("bad audio line '{}'", lines[4]))),
        };

        if lines[5] != "i=speech" {
            return Err(invalid(format!("bad info line '{}'", lines[5])));
        }

        let floor_port = match lines[6].strip_prefix("m=application ").and_then(|r| r.strip_suffix(" udp MCPTT")) {
            Some(port) => parse_port(port, lines[6])?,
            None       => return Err(invalid(format!("bad application line '{}'", lines[6]))),
        };

        if lines[7] != "a=fmtp:MCPTT" {
            return Err(invalid(format!("bad attribute line '{}'", lines[7])));
        }

        Ok(Self { origin, group, speech_port, floor_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn renders_exact_grammar() {
        let sdp = Sdp::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(225, 0, 0, 1)),
            49151,
            49150,
        );
        assert_eq!(
            sdp.to_string(),
            "v=0;o=- 0 0 IN IP4 10.0.0.1;s=-;c=IN IP4 225.0.0.1/255;m=audio 49151 RTP/AVP 0;i=speech;m=application 49150 udp MCPTT;a=fmtp:MCPTT;"
        );
    }

    #[test]
    fn parses_ipv6() {
        let text = "v=0;o=- 0 0 IN IP6 ::1;s=-;c=IN IP6 ff02::1/255;m=audio 1000 RTP/AVP 0;i=speech;m=application 1001 udp MCPTT;a=fmtp:MCPTT;";
        let sdp: Sdp = text.parse().unwrap();
        assert_eq!(sdp.origin, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(sdp.speech_port, 1000);
        assert_eq!(sdp.floor_port, 1001);
        assert_eq!(sdp.to_string(), text);
    }

    #[test]
    fn rejects_type_mismatch() {
        let text = "v=0;o=- 0 0 IN IP6 10.0.0.1;s=-;c=IN IP4 10.0.0.1/255;m=audio 1 RTP/AVP 0;i=speech;m=application 2 udp MCPTT;a=fmtp:MCPTT;";
        assert!(matches!(text.parse::<Sdp>(), Err(DecodeError::InvalidSdp(_))));
    }

    #[test]
    fn rejects_missing_terminator() {
        let text = "v=0;o=- 0 0 IN IP4 10.0.0.1;s=-;c=IN IP4 10.0.0.1/255;m=audio 1 RTP/AVP 0;i=speech;m=application 2 udp MCPTT;a=fmtp:MCPTT";
        assert!(text.parse::<Sdp>().is_err());
    }

    #[test]
    fn rejects_bad_port() {
        let text = "v=0;o=- 0 0 IN IP4 10.0.0.1;s=-;c=IN IP4 10.0.0.1/255;m=audio 70000 RTP/AVP 0;i=speech;m=application 2 udp MCPTT;a=fmtp:MCPTT;";
        assert!(text.parse::<Sdp>().is_err());
    }
}
