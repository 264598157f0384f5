// author: kodeholic (powered by Claude)

// FloorQueue: 발언 대기열 + Preemption 판단
// 호(call)당 1개, FloorArbitrator가 단독 소유

use std::collections::VecDeque;

use serde::Serialize;

use crate::protocol::Indicator;

/// Floor 표시자: 발언의 성격 (MBCP Floor Indicator 중 우선순위 관련 비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FloorIndicator {
    Normal,        // 일반 발언
    Broadcast,     // 단방향 방송, 우선순위 판단은 Normal과 같다
    ImminentPeril, // 임박한 위험, 일반보다 높음
    Emergency,     // 긴급, 최고
}

impl FloorIndicator {
    /// 와이어 비트 → 표시자 (Emergency > ImminentPeril > Broadcast > Normal)
    pub fn from_bits(indicator: Indicator) -> Self {
        if indicator.contains(Indicator::EMERGENCY) {
            FloorIndicator::Emergency
        } else if indicator.contains(Indicator::IMMINENT_PERIL) {
            FloorIndicator::ImminentPeril
        } else if indicator.contains(Indicator::BROADCAST) {
            FloorIndicator::Broadcast
        } else {
            FloorIndicator::Normal
        }
    }

    pub fn to_bits(self) -> Indicator {
        match self {
            FloorIndicator::Normal        => Indicator::normal(),
            FloorIndicator::Broadcast     => Indicator(Indicator::BROADCAST),
            FloorIndicator::ImminentPeril => Indicator(Indicator::IMMINENT_PERIL),
            FloorIndicator::Emergency     => Indicator(Indicator::EMERGENCY),
        }
    }

    /// preemption 등급: 0 일반, 1 imminent, 2 emergency
    fn class(self) -> u8 {
        match self {
            FloorIndicator::Normal | FloorIndicator::Broadcast => 0,
            FloorIndicator::ImminentPeril => 1,
            FloorIndicator::Emergency     => 2,
        }
    }
}

/// 요청이 현재 holder를 밀어낼 수 있는지
///
/// 등급이 높으면 항상, 같으면 priority가 더 높을 때만, 낮으면 불가.
pub fn is_preemptive(
    req_priority:     u8,
    req_indicator:    FloorIndicator,
    holder_priority:  u8,
    holder_indicator: FloorIndicator,
) -> bool {
    let (req, holder) = (req_indicator.class(), holder_indicator.class());
    if req != holder {
        return req > holder;
    }
    req_priority > holder_priority
}

/// 대기열 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorQueueEntry {
    pub user_id:   u32,
    pub ssrc:      u32,
    pub priority:  u8,
    pub indicator: FloorIndicator,
    pub queued_at: u64,
}

/// priority 내림차순, 같은 priority는 도착 순서(FIFO)
#[derive(Debug, Clone)]
pub struct FloorQueue {
    entries:  VecDeque<FloorQueueEntry>,
    capacity: usize,
}

impl FloorQueue {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), capacity }
    }

    /// 대기열에 넣고 1-based 순번 반환, 가득 차면 None
    /// 같은 user_id가 이미 있으면 갱신 (새 priority 위치로 이동)
    pub fn enqueue(&mut self, entry: FloorQueueEntry) -> Option<usize> {
        let existing = self.entries.iter().position(|e| e.user_id == entry.user_id);
        match existing {
            Some(i) => {
                self.entries.remove(i);
            }
            None if self.entries.len() >= self.capacity => return None,
            None => {}
        }
        let pos = self.entries.iter().position(|e| e.priority < entry.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        Some(pos + 1)
    }

    /// 다음 후보 꺼내기
    pub fn dequeue_next(&mut self) -> Option<FloorQueueEntry> {
        self.entries.pop_front()
    }

    /// 특정 user 제거 (Release / 호 이탈)
    pub fn remove(&mut self, user_id: u32) -> Option<FloorQueueEntry> {
        let i = self.entries.iter().position(|e| e.user_id == user_id)?;
        self.entries.remove(i)
    }

    /// 1-based 순번, 없으면 None
    pub fn position(&self, user_id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.user_id == user_id).map(|i| i + 1)
    }

    pub fn get(&self, user_id: u32) -> Option<&FloorQueueEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    pub fn contains(&self, user_id: u32) -> bool {
        self.position(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FloorQueueEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
