// author: kodeholic (powered by Claude)

// mcptt-floor: MCPTT floor control / 호 제어 엔진
//
// config   : 프로토콜 상수 + 런타임 설정
// protocol : 와이어 코덱
// core     : 상태머신 (arbitrator / participant / 호 제어)
// sim      : 스케줄러 / 전송 기준 구현 + 시뮬레이션 드라이버
// trace    : 관찰 이벤트 버스

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod sim;
pub mod trace;
pub mod utils;

pub use error::{McpttError, McpttResult};
