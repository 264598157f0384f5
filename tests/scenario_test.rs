// 내장 시나리오 A–E: 트레이스로 floor 교환 순서 검증

use std::sync::Arc;

use mcptt_floor::core::{ArbitratorState, ParticipantState};
use mcptt_floor::protocol::RejectCause;
use mcptt_floor::sim::{Scenario, Simulation};
use mcptt_floor::trace::{TraceDir, TraceEvent, TraceKind, TraceLog};

fn build(scenario: Scenario) -> (Simulation, Arc<TraceLog>) {
    let log = TraceLog::new();
    let sim = scenario.plan().build(1, &[], log.clone()).unwrap();
    (sim, log)
}

fn run(scenario: Scenario) -> (Simulation, Arc<TraceLog>, u16) {
    let (mut sim, log) = build(scenario);
    sim.run_until(scenario.plan().duration);
    let call_id = active_call(&sim);
    (sim, log, call_id)
}

fn active_call(sim: &Simulation) -> u16 {
    sim.client(1).and_then(|c| c.active_call()).expect("call should be active")
}

/// 서버가 보낸 floor 메시지 (시각, 수신 user, 이름)
fn server_tx(log: &TraceLog) -> Vec<(u64, u32, &'static str)> {
    log.events().iter()
        .filter(|e| e.node == 0 && e.dir == TraceDir::Out)
        .filter_map(|e| e.message().map(|(_, name)| (e.ts, e.user_id, name)))
        .filter(|(_, _, name)| name.starts_with("Floor"))
        .collect()
}

/// 서버가 받은 floor 메시지 (시각, 송신 user, 이름)
fn server_rx(log: &TraceLog) -> Vec<(u64, u32, &'static str)> {
    log.events().iter()
        .filter(|e| e.node == 0 && e.dir == TraceDir::In)
        .filter_map(|e| e.message().map(|(_, name)| (e.ts, e.user_id, name)))
        .filter(|(_, _, name)| name.starts_with("Floor"))
        .collect()
}

fn after(msgs: &[(u64, u32, &'static str)], from: u64) -> Vec<(u32, &'static str)> {
    msgs.iter().filter(|(ts, _, _)| *ts >= from).map(|(_, u, n)| (*u, *n)).collect()
}

fn entered(events: &[TraceEvent], node: u32, machine: &str, state: &str) -> bool {
    events.iter().any(|e| e.node == node && e.is_state_change(machine, state))
}

fn no_failures(log: &TraceLog) {
    let failures: Vec<_> = log.events().into_iter()
        .filter(|e| matches!(e.kind, TraceKind::DeliveryFailure { .. } | TraceKind::RequestFailed { .. }))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
}

#[test]
fn scenario_a_basic_release() {
    let (sim, log, call_id) = run(Scenario::A);

    let tx = server_tx(&log);
    let grant = after(&tx, 3_000);
    assert_eq!(grant[0], (1, "FloorGranted"));
    assert_eq!(grant[1], (2, "FloorTaken"));

    // P1 Release(ACK 요청) → Ack→P1, Idle→P2. P1에게는 Idle 없음
    let release = after(&tx, 4_000);
    assert_eq!(release, vec![(1, "FloorAck"), (2, "FloorIdle")]);

    let rx = after(&server_rx(&log), 4_000);
    assert_eq!(rx[0], (1, "FloorRelease"));

    assert_eq!(sim.floor_state(1), Some(ParticipantState::NoPermission));
    assert_eq!(sim.floor_state(2), Some(ParticipantState::NoPermission));
    assert_eq!(sim.arbitrator_state(call_id), Some(ArbitratorState::Idle));
    no_failures(&log);
}

#[test]
fn scenario_a_access_time_is_round_trip() {
    let (_, log, _) = run(Scenario::A);
    let access: Vec<u64> = log.events().iter()
        .filter_map(|e| match e.kind {
            TraceKind::AccessTime { millis } if e.node == 1 => Some(millis),
            _ => None,
        })
        .collect();
    // 지연 10ms 왕복
    assert_eq!(access, vec![20]);
}

#[test]
fn scenario_b_granted_after_release() {
    let (sim, log, call_id) = run(Scenario::B);

    let tx = after(&server_tx(&log), 6_000);
    assert_eq!(tx[0], (2, "FloorGranted"));
    assert_eq!(tx[1], (1, "FloorTaken"));

    // Granted에 대한 P2의 ACK
    let rx = after(&server_rx(&log), 6_000);
    assert_eq!(rx[0], (2, "FloorRequest"));
    assert!(rx.contains(&(2, "FloorAck")));

    assert_eq!(sim.floor_state(2), Some(ParticipantState::HasPermission));
    assert_eq!(sim.holders(call_id), vec![2]);
    no_failures(&log);
}

#[test]
fn scenario_c_priority_revoke() {
    let (sim, log, call_id) = run(Scenario::C);

    let tx = after(&server_tx(&log), 5_000);
    assert_eq!(tx[0], (1, "FloorRevoke"));
    assert_eq!(&tx[1..3], &[(2, "FloorGranted"), (1, "FloorTaken")]);

    let rx = after(&server_rx(&log), 5_000);
    assert_eq!(rx, vec![(2, "FloorRequest"), (1, "FloorRelease")]);

    let events = log.events();
    assert!(entered(&events, 1, "participant", "PendingRelease"));
    assert_eq!(sim.floor_state(1), Some(ParticipantState::NoPermission));
    assert_eq!(sim.floor_state(2), Some(ParticipantState::HasPermission));
    assert_eq!(sim.holders(call_id), vec![2]);
}

#[test]
fn scenario_d_deny_without_queueing() {
    let (sim, log, call_id) = run(Scenario::D);

    let tx = after(&server_tx(&log), 4_000);
    assert_eq!(tx, vec![(2, "FloorDeny")]);

    let floor = sim.client(2).and_then(|c| c.call(call_id)).map(|c| c.floor()).unwrap();
    assert_eq!(floor.last_deny(), Some(RejectCause::AnotherClientHasPermission));
    assert!(!entered(&log.events(), 2, "participant", "Queued"));

    assert_eq!(sim.floor_state(1), Some(ParticipantState::HasPermission));
    assert_eq!(sim.floor_state(2), Some(ParticipantState::NoPermission));
    assert_eq!(sim.holders(call_id), vec![1]);
}

#[test]
fn scenario_e_dual_floor() {
    let (mut sim, log) = build(Scenario::E);

    sim.run_until(7_000);
    let call_id = active_call(&sim);
    assert_eq!(after(&server_tx(&log), 4_000)[0], (2, "FloorDeny"));
    assert_eq!(sim.arbitrator_state(call_id), Some(ArbitratorState::DualTaken));
    assert_eq!(sim.holders(call_id), vec![1, 3]);
    assert_eq!(sim.floor_state(1), Some(ParticipantState::HasPermission));
    assert_eq!(sim.floor_state(3), Some(ParticipantState::HasPermission));
    let p1 = sim.client(1).and_then(|c| c.call(call_id)).map(|c| c.floor()).unwrap();
    assert!(p1.is_overridden());

    // P1 해제 → P3가 단독 holder
    sim.run_until(9_000);
    assert_eq!(sim.arbitrator_state(call_id), Some(ArbitratorState::Taken));
    assert_eq!(sim.holders(call_id), vec![3]);
    assert_eq!(sim.floor_state(1), Some(ParticipantState::NoPermission));
    let tx = after(&server_tx(&log), 8_000);
    assert!(tx.contains(&(1, "FloorTaken")));
    assert!(tx.contains(&(2, "FloorTaken")));

    // P3 해제 → Idle
    sim.run_until(12_000);
    assert_eq!(sim.arbitrator_state(call_id), Some(ArbitratorState::Idle));
    assert!(sim.holders(call_id).is_empty());
    for user in 1..=3 {
        assert_eq!(sim.floor_state(user), Some(ParticipantState::NoPermission));
    }
    let idle: Vec<u32> = after(&server_tx(&log), 10_000).into_iter()
        .filter(|(_, n)| *n == "FloorIdle")
        .map(|(u, _)| u)
        .collect();
    assert_eq!(idle, vec![1, 2, 3]);
}

#[test]
fn talker_media_reaches_the_listener() {
    let (sim, log, call_id) = run(Scenario::B);
    let floor = |user: u32| sim.client(user).and_then(|c| c.call(call_id)).map(|c| c.floor()).unwrap();

    // P1 발언 구간(3s-4s)의 패킷은 모두 P2에게 중계
    assert!(floor(1).media_sent() >= 2);
    assert_eq!(floor(2).media_received(), floor(1).media_sent());
    // P2는 6s부터 계속 발언 중
    assert!(floor(1).media_received() >= 5);
    assert!(floor(2).is_sending_media());

    // Idle 구간에는 중계가 없다
    let relayed_while_idle = log.events().iter()
        .filter(|e| e.node == 0 && e.ts > 4_100 && e.ts < 6_000)
        .any(|e| e.message() == Some((TraceDir::Out, "Media")));
    assert!(!relayed_while_idle);
}

#[test]
fn attribute_override_replaces_scenario_default() {
    let log = TraceLog::new();
    let extra = vec![("AckRequired".to_string(), "false".to_string())];
    let plan = Scenario::A.plan();
    let mut sim = plan.build(1, &extra, log.clone()).unwrap();
    sim.run_until(plan.duration);
    assert!(!sim.server().config().ack_required);
    // 서버가 ACK를 요구하지 않으니 참가자 ACK도 없다
    assert!(!server_rx(&log).iter().any(|(_, user, name)| *user == 2 && *name == "FloorAck"));
    // P1의 Release는 여전히 ACK 요청, Ack는 P1에게만
    let release = after(&server_tx(&log), 4_000);
    assert_eq!(release, vec![(1, "FloorAck"), (2, "FloorIdle")]);
}
