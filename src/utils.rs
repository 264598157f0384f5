// author: kodeholic (powered by Gemini)

/// 밀리초 → "SSS.mmm" 초 단위 표기
pub fn format_secs(ms: u64) -> String {
    format!("{:>3}.{:03}", ms / 1_000, ms % 1_000)
}
