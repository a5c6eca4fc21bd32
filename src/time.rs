use chrono::{DateTime, NaiveDateTime, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// RFC 3339 rendering with millisecond precision, the format the store writes.
pub fn to_rfc3339_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Values below this are treated as unix seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

pub fn normalize_epoch(value: i64) -> i64 {
    if (-SECONDS_CUTOFF..SECONDS_CUTOFF).contains(&value) {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Parse the timestamp spellings the backend has been seen to emit.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(normalize_epoch(value));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn parses_backend_timestamp_spellings() {
        assert_eq!(parse_timestamp_ms("1700000000"), Some(1_700_000_000_000));
        assert_eq!(parse_timestamp_ms("1700000000123"), Some(1_700_000_000_123));
        assert_eq!(
            parse_timestamp_ms("2024-01-01T00:00:00.500Z"),
            Some(1_704_067_200_500)
        );
        assert_eq!(
            parse_timestamp_ms("2024-01-01 00:00:01"),
            Some(1_704_067_201_000)
        );
        assert_eq!(parse_timestamp_ms("yesterday"), None);
        assert_eq!(parse_timestamp_ms("  "), None);
    }

    #[test]
    fn rfc3339_rendering_round_trips() {
        let rendered = to_rfc3339_ms(1_704_067_200_500);
        assert_eq!(rendered, "2024-01-01T00:00:00.500Z");
        assert_eq!(parse_timestamp_ms(&rendered), Some(1_704_067_200_500));
    }
}
