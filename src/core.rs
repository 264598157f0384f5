// author: kodeholic (powered by Gemini)

// 네트워크와 분리된 상태머신 모음
//
// 모든 상태머신은 Ctx(스케줄러 / 전송 / 이벤트 싱크)만 통해 바깥과 통신한다.
//
//   서버 노드   : CallServer ─ FloorArbitrator ─ TowardsParticipant × N
//   클라이언트  : PttApp ─ FloorParticipant

pub mod alloc;
pub mod arbitrator;
pub mod call;
pub mod client;
pub mod participant;
pub mod queue;
pub mod server;
pub mod timer;
pub mod towards;

pub use arbitrator::{ArbitratorState, FloorArbitrator, TimerOutcome};
pub use call::{Call, CallState, CallTraits, Member};
pub use client::PttApp;
pub use participant::{FloorParticipant, ParticipantState};
pub use queue::{is_preemptive, FloorIndicator, FloorQueue, FloorQueueEntry};
pub use server::CallServer;
pub use timer::{Ctx, Millis, Scheduler, TimerHandle, TimerId, TimerKey, TimerOwner, Transport, SERVER_NODE};
pub use towards::{TowardsParticipant, TowardsState};
