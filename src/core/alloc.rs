// author: kodeholic (powered by Claude)

// Allocator: call id / SSRC / 포트 쌍 할당기
//
// 프로세스 전역 카운터 대신 노드마다 하나씩 소유한다.
// 시드가 같으면 할당 순서도 같다 (재현 가능한 시뮬레이션).

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config;
use crate::error::{McpttError, McpttResult};

pub struct Allocator {
    rng:       StdRng,
    call_ids:  HashSet<u16>,
    ssrcs:     HashSet<u32>,
    next_port: u16,
}

impl Allocator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng:       StdRng::seed_from_u64(seed),
            call_ids:  HashSet::new(),
            ssrcs:     HashSet::new(),
            next_port: config::FLOOR_PORT_BASE,
        }
    }

    /// 사용 중이 아닌 call id 발급
    pub fn next_call_id(&mut self) -> McpttResult<u16> {
        if self.call_ids.len() > u16::MAX as usize {
            return Err(McpttError::CallIdExhausted);
        }
        let start: u16 = self.rng.gen();
        let id = (0..=u16::MAX)
            .map(|off| start.wrapping_add(off))
            .find(|id| !self.call_ids.contains(id))
            .ok_or(McpttError::CallIdExhausted)?;
        self.call_ids.insert(id);
        trace!("[alloc] call id {}", id);
        Ok(id)
    }

    /// 다른 노드가 정한 call id를 사용 중으로 표시, 이미 쓰는 중이면 false
    pub fn reserve_call_id(&mut self, id: u16) -> bool {
        self.call_ids.insert(id)
    }

    pub fn free_call_id(&mut self, id: u16) {
        self.call_ids.remove(&id);
    }

    pub fn in_use(&self, id: u16) -> bool {
        self.call_ids.contains(&id)
    }

    /// 0이 아닌 고유 SSRC
    pub fn next_ssrc(&mut self) -> u32 {
        loop {
            let ssrc: u32 = self.rng.gen();
            if ssrc != 0 && self.ssrcs.insert(ssrc) {
                return ssrc;
            }
        }
    }

    /// (floor, media) 포트 쌍, 상한에 닿으면 시작값으로 되돌아간다
    pub fn next_ports(&mut self) -> (u16, u16) {
        let floor = self.next_port;
        self.next_port = match floor.checked_add(config::PORT_STEP) {
            Some(p) if p < u16::MAX => p,
            _ => config::FLOOR_PORT_BASE,
        };
        (floor, floor + (config::MEDIA_PORT_BASE - config::FLOOR_PORT_BASE))
    }
}
