use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

const FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d.%m.%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

/// Parse a wall-clock timestamp in any of the formats seen in meter exports
/// and forecast files. Offsets are dropped, keeping local wall time.
pub fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Truncate to the start of the hour
pub fn floor_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date()
        .and_hms_opt(ts.hour(), 0, 0)
        .unwrap_or(ts)
}

/// Last calendar day of the given month
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(13, 15, 0)
            .unwrap();
        assert_eq!(parse_local_datetime("2024-03-01 13:15:00"), Some(expected));
        assert_eq!(parse_local_datetime("2024-03-01T13:15:00"), Some(expected));
        assert_eq!(parse_local_datetime("01.03.2024 13:15"), Some(expected));
        assert_eq!(parse_local_datetime("2024-03-01T13:15:00+01:00"), Some(expected));
        assert!(parse_local_datetime("yesterday").is_none());
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2025, 2), 28);
        assert_eq!(last_day_of_month(2024, 2), 29);
        assert_eq!(last_day_of_month(2025, 12), 31);
        assert_eq!(last_day_of_month(2025, 4), 30);
    }

    #[test]
    fn test_floor_hour() {
        let ts = parse_local_datetime("2024-03-01 13:45:10").unwrap();
        assert_eq!(floor_hour(ts), parse_local_datetime("2024-03-01 13:00").unwrap());
    }
}
