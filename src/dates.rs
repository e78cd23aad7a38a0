// 📅 Date Standardization
// Raw date/time text → timestamp; timestamp → calendar-date merge key.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// Canonical text form of a parsed timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical text form of a merge key
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse date or date-time text. Unparseable input yields `None`, never an error.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Truncate to calendar-date granularity
pub fn merge_date(ts: &NaiveDateTime) -> NaiveDate {
    ts.date()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Year of any parseable date/time text
pub fn year_of(raw: &str) -> Option<i32> {
    parse_timestamp(raw).map(|ts| ts.year())
}

/// Standardize one raw value: (canonical timestamp, merge key)
pub fn standardize(raw: Option<&str>) -> (Option<String>, Option<String>) {
    match raw.and_then(parse_timestamp) {
        Some(ts) => (
            Some(format_timestamp(&ts)),
            Some(format_date(&merge_date(&ts))),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_extract_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 9, 11).unwrap();
        for raw in [
            "09/11/2021",
            "2021-09-11",
            "2021-09-11T00:00:00.000",
            "2021-09-11 00:00:00",
            "2021/09/11",
            "2021-09-11T00:00:00Z",
        ] {
            let ts = parse_timestamp(raw).unwrap_or_else(|| panic!("failed on {raw}"));
            assert_eq!(ts.date(), expected, "{raw}");
        }
    }

    #[test]
    fn test_parse_keeps_time_of_day() {
        let ts = parse_timestamp("03/05/2022 02:39:00 PM").unwrap();
        assert_eq!(format_timestamp(&ts), "2022-03-05 14:39:00");
    }

    #[test]
    fn test_unparseable_is_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("13/45/2021").is_none());
    }

    #[test]
    fn test_standardize_is_idempotent() {
        let (ts, key) = standardize(Some("09/11/2021"));
        assert_eq!(ts.as_deref(), Some("2021-09-11 00:00:00"));
        assert_eq!(key.as_deref(), Some("2021-09-11"));

        let (again, key_again) = standardize(ts.as_deref());
        assert_eq!(again, ts);
        assert_eq!(key_again, key);
        assert_eq!(standardize(None), (None, None));
    }

    #[test]
    fn test_year_of() {
        assert_eq!(year_of("2019-12-31 23:59:59"), Some(2019));
        assert_eq!(year_of("garbage"), None);
    }
}
