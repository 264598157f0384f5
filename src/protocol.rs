// author: kodeholic (powered by Claude)

// 와이어 코덱
//
// floor_msg : Floor Control (MBCP) 메시지
// call_msg  : 호 제어 메시지 (그룹 / 개별 / 긴급 알림)
// session   : 세션 수립 / 해제 (INVITE / 응답 / BYE)
// media_msg : 음성 미디어 패킷 (RTP 유사)

pub mod call_msg;
pub mod cause;
pub mod field;
pub mod floor_msg;
pub mod media_msg;
pub mod opcode;
pub mod sdp;
pub mod session;

pub use call_msg::CallMessage;
pub use cause::{CallRejectReason, RejectCause};
pub use field::{CallType, CommMode, Indicator, Type6Text, UserLoc};
pub use floor_msg::{FloorBody, FloorKind, FloorMessage, Source};
pub use media_msg::MediaMessage;
pub use sdp::Sdp;
pub use session::SessionMessage;
