/// Utility functions
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.parse::<f64>().ok();
    }
    None
}

/// Parse a provider timestamp. DONKI omits seconds ("2025-08-20T12:00Z"),
/// SWPC uses "2025-08-20 12:00:00.000"; both fall outside strict RFC 3339.
pub fn parse_event_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    None
}

/// Date range covering the last `n` days, formatted for provider queries.
pub fn last_days(n: u64) -> (String, String) {
    let to = Utc::now().date_naive();
    let from = to - chrono::Days::new(n);
    (from.to_string(), to.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_from_float() {
        let json = serde_json::json!(42.5);
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_string() {
        let json = serde_json::json!("42.5");
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_invalid() {
        let json = serde_json::json!("invalid");
        assert_eq!(num(&json), None);
    }

    #[test]
    fn test_parse_event_time_rfc3339() {
        assert!(parse_event_time("2025-08-20T12:00:00Z").is_some());
    }

    #[test]
    fn test_parse_event_time_donki_minutes() {
        let dt = parse_event_time("2025-08-20T12:00Z").expect("should parse");
        assert_eq!(dt.to_rfc3339(), "2025-08-20T12:00:00+00:00");
    }

    #[test]
    fn test_parse_event_time_swpc_space_separated() {
        assert!(parse_event_time("2025-08-20 12:00:00.000").is_some());
    }

    #[test]
    fn test_parse_event_time_garbage() {
        assert_eq!(parse_event_time("not a time"), None);
    }

    #[test]
    fn test_last_days_ordering() {
        let (from, to) = last_days(5);
        assert!(from < to);
    }
}
