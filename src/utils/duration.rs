//! Human-readable track durations

/// Format seconds as `m:ss`, or `h:mm:ss` past the hour
pub fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Parse a `m:ss` / `h:mm:ss` duration back into seconds
pub fn parse_duration(human: &str) -> Option<u64> {
    let human = human.trim();
    if human.is_empty() {
        return None;
    }
    human
        .split(':')
        .try_fold(0u64, |acc, part| {
            acc.checked_mul(60)?.checked_add(part.parse::<u64>().ok()?)
        })
}
