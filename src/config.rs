// author: kodeholic (powered by Claude)

// 매직 넘버를 배제하고 Floor Control 엔진의 타이머/카운터/포트를 제어하는 상수 모음입니다.
// 런타임 설정(FloorConfig 등)은 여기 상수를 기본값으로 사용합니다.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{McpttError, McpttResult};

// ----------------------------------------------------------------------------
// [포트]
// ----------------------------------------------------------------------------

/// 호 제어(SIP 유사) 메시지 포트
pub const SESSION_PORT: u16 = 5060;

/// 서버 측 Floor Control 포트, 클라이언트 할당 시작값
pub const FLOOR_PORT_BASE: u16 = 49150;

/// 미디어(음성) 포트 시작값, 서버는 이 포트 하나로 모든 호의 미디어를 받는다
pub const MEDIA_PORT_BASE: u16 = 49151;

/// 호마다 floor/media 포트 쌍을 2씩 증가시키며 할당
pub const PORT_STEP: u16 = 2;

// ----------------------------------------------------------------------------
// Floor Control: Arbitrator (MBCP TS 24.380 기반)
// ----------------------------------------------------------------------------

/// T1: holder 미디어 끊김 감지, 만료 시 발언권 회수 (4초)
pub const FLOOR_T1_MS: u64 = 4_000;

/// T2: 최대 발언 시간, 만료 시 Revoke (30초)
pub const FLOOR_T2_MS: u64 = 30_000;

/// T3: Revoke 후 Release 대기 유예 (3초)
pub const FLOOR_T3_MS: u64 = 3_000;

/// T4: Idle 상태 무활동 타이머, 만료 시 호 해제 (30초)
pub const FLOOR_T4_MS: u64 = 30_000;

/// T12: 이중 floor 최대 점유 시간 (30초)
pub const FLOOR_T12_MS: u64 = 30_000;

/// ACK 미수신 재전송 주기 (1초)
pub const ACK_RETRY_INTERVAL_MS: u64 = 1_000;

/// ACK 미수신 최대 재전송 횟수, 초과 시 DeliveryFailure
pub const ACK_RETRY_LIMIT: u32 = 3;

/// 대기열 최대 길이 (queue position은 와이어에서 u8)
pub const FLOOR_QUEUE_CAPACITY: usize = 16;

// ----------------------------------------------------------------------------
// Floor Control: Participant
// ----------------------------------------------------------------------------

/// T100: Floor Release 응답 대기 (1초)
pub const FLOOR_T100_MS: u64 = 1_000;

/// T101: Floor Request 응답 대기 (1초)
pub const FLOOR_T101_MS: u64 = 1_000;

/// T104: Queue Position Request 응답 대기 (1초)
pub const FLOOR_T104_MS: u64 = 1_000;

/// C100 / C101 / C104, 각 타이머 재시도 한도
pub const FLOOR_C100: u32 = 3;
pub const FLOOR_C101: u32 = 3;
pub const FLOOR_C104: u32 = 3;

/// 미디어 패킷당 데이터 바이트
pub const MEDIA_BYTES: u16 = 8;

/// 미디어 패킷 주기: 8 bytes @ 68.75 b/s ≈ 931ms
pub const MEDIA_INTERVAL_MS: u64 = 931;

/// 발언권 우선순위: 일반 기본값
pub const FLOOR_PRIORITY_DEFAULT: u8 = 1;

/// 발언권 우선순위: Imminent Peril 호 기본값
pub const FLOOR_PRIORITY_IMMINENT_PERIL: u8 = 2;

/// 발언권 우선순위: Emergency 호 기본값
pub const FLOOR_PRIORITY_EMERGENCY: u8 = 3;

// ----------------------------------------------------------------------------
// [FloorConfig] Arbitrator 런타임 설정 (평면 속성 맵)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct FloorConfig {
    /// 서버 → 참가자 메시지에 ACK 요구
    pub ack_required:          bool,
    /// 높은 우선순위 요청이 현재 holder를 Revoke
    pub audio_cut_in:          bool,
    /// 두 번째 동시 holder 허용
    pub dual_floor_supported:  bool,
    pub queueing_supported:    bool,
    /// 서버가 보내는 floor 메시지의 SSRC
    pub tx_ssrc:               u32,
    pub queue_capacity:        usize,
    pub ack_retry_interval_ms: u64,
    pub ack_retry_limit:       u32,
    pub t1_ms:                 u64,
    pub t2_ms:                 u64,
    pub t3_ms:                 u64,
    pub t4_ms:                 u64,
    pub t12_ms:                u64,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            ack_required:          false,
            audio_cut_in:          true,
            dual_floor_supported:  false,
            queueing_supported:    false,
            tx_ssrc:               0,
            queue_capacity:        FLOOR_QUEUE_CAPACITY,
            ack_retry_interval_ms: ACK_RETRY_INTERVAL_MS,
            ack_retry_limit:       ACK_RETRY_LIMIT,
            t1_ms:                 FLOOR_T1_MS,
            t2_ms:                 FLOOR_T2_MS,
            t3_ms:                 FLOOR_T3_MS,
            t4_ms:                 FLOOR_T4_MS,
            t12_ms:                FLOOR_T12_MS,
        }
    }
}

impl FloorConfig {
    /// `Name=value` 쌍 목록 → 설정 (CLI `--attr` 형식)
    pub fn from_attributes<K, V>(pairs: &[(K, V)]) -> McpttResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config: Self = from_map(attribute_map(pairs))?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 객체 → 설정
    pub fn from_json(json: &str) -> McpttResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| McpttError::ConfigurationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 모순된 조합 검출: Coordinator 생성 시 호출
    pub fn validate(&self) -> McpttResult<()> {
        if self.ack_required && (self.ack_retry_interval_ms == 0 || self.ack_retry_limit == 0) {
            return Err(McpttError::ConfigurationError(
                "AckRequired needs non-zero AckRetryIntervalMs and AckRetryLimit".into(),
            ));
        }
        if self.queueing_supported && self.queue_capacity == 0 {
            return Err(McpttError::ConfigurationError(
                "QueueingSupported with QueueCapacity=0".into(),
            ));
        }
        if self.queue_capacity > u8::MAX as usize {
            return Err(McpttError::ConfigurationError(format!(
                "QueueCapacity {} exceeds {}", self.queue_capacity, u8::MAX,
            )));
        }
        if self.t1_ms == 0 || self.t2_ms == 0 || self.t3_ms == 0 || self.t4_ms == 0 {
            return Err(McpttError::ConfigurationError("T1/T2/T3/T4 must be non-zero".into()));
        }
        if self.dual_floor_supported && self.t12_ms == 0 {
            return Err(McpttError::ConfigurationError(
                "DualFloorSupported with T12Ms=0".into(),
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// [ParticipantConfig] 클라이언트 floor 머신 설정
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct ParticipantConfig {
    /// Release에 ACK 요청
    pub ack_required:      bool,
    /// None이면 호 타입 테이블의 우선순위 사용
    pub priority:          Option<u8>,
    pub t100_ms:           u64,
    pub t101_ms:           u64,
    pub t104_ms:           u64,
    pub c100:              u32,
    pub c101:              u32,
    pub c104:              u32,
    /// 발언 중 미디어 패킷 주기, 0이면 미디어를 보내지 않는다
    pub media_interval_ms: u64,
    pub media_bytes:       u16,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            ack_required:      false,
            priority:          None,
            t100_ms:           FLOOR_T100_MS,
            t101_ms:           FLOOR_T101_MS,
            t104_ms:           FLOOR_T104_MS,
            c100:              FLOOR_C100,
            c101:              FLOOR_C101,
            c104:              FLOOR_C104,
            media_interval_ms: MEDIA_INTERVAL_MS,
            media_bytes:       MEDIA_BYTES,
        }
    }
}

impl ParticipantConfig {
    pub fn from_attributes<K, V>(pairs: &[(K, V)]) -> McpttResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config: Self = from_map(attribute_map(pairs))?;
        if config.t100_ms == 0 || config.t101_ms == 0 || config.t104_ms == 0 {
            return Err(McpttError::ConfigurationError("T100/T101/T104 must be non-zero".into()));
        }
        Ok(config)
    }
}

// ----------------------------------------------------------------------------
// [CallTypePriorities] 호 타입별 기본 floor 우선순위
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct CallTypePriorities {
    pub basic_group:       u8,
    pub broadcast:         u8,
    pub emergency_group:   u8,
    pub imminent_peril:    u8,
    pub private:           u8,
    pub emergency_private: u8,
}

impl Default for CallTypePriorities {
    fn default() -> Self {
        Self {
            basic_group:       FLOOR_PRIORITY_DEFAULT,
            broadcast:         FLOOR_PRIORITY_DEFAULT,
            emergency_group:   FLOOR_PRIORITY_EMERGENCY,
            imminent_peril:    FLOOR_PRIORITY_IMMINENT_PERIL,
            private:           FLOOR_PRIORITY_DEFAULT,
            emergency_private: FLOOR_PRIORITY_EMERGENCY,
        }
    }
}

// ----------------------------------------------------------------------------
// [내부 유틸]
// ----------------------------------------------------------------------------

/// 문자열 값을 bool / 정수 / 문자열 JSON 값으로 추론
fn attribute_map<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        let raw = value.as_ref().trim();
        let parsed = match raw {
            "true"  => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match raw.parse::<u64>() {
                Ok(n)  => Value::from(n),
                Err(_) => Value::String(raw.to_string()),
            },
        };
        map.insert(key.as_ref().trim().to_string(), parsed);
    }
    map
}

fn from_map<T: for<'de> Deserialize<'de>>(map: Map<String, Value>) -> McpttResult<T> {
    serde_json::from_value(Value::Object(map))
        .map_err(|e| McpttError::ConfigurationError(e.to_string()))
}

/// `Name=value` 문자열 하나를 분해 (CLI 인자용)
pub fn parse_attribute(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected Name=value, got '{}'", arg)),
    }
}
