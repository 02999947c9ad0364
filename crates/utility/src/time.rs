use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Start of the operations calendar day, local time. A trip at 01:00 still
/// belongs to the previous day's service.
pub const SERVICE_DAY_ROLLOVER: NaiveTime = match NaiveTime::from_hms_opt(2, 30, 0) {
    Some(t) => t,
    None => panic!("invalid rollover time"),
};

/// The service date for a local timestamp. Times before 02:30 count against
/// the previous calendar day.
pub fn service_day<Tz: TimeZone>(now: DateTime<Tz>) -> NaiveDate {
    let naive = now.naive_local();
    if naive.time() < SERVICE_DAY_ROLLOVER {
        naive.date() - Duration::days(1)
    } else {
        naive.date()
    }
}

/// Parse a Microsoft-AJAX timestamp of the form `/Date(<ms>[+-HHMM])/`,
/// returning epoch milliseconds with the signed offset applied.
pub fn parse_msajax(raw: &str) -> Option<i64> {
    let inner = raw.trim().strip_prefix("/Date(")?.strip_suffix(")/")?;

    let split = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i);

    let (ms_part, offset_part) = match split {
        Some(i) => (&inner[..i], Some(&inner[i..])),
        None => (inner, None),
    };

    let ms: i64 = ms_part.parse().ok()?;
    let offset_ms = match offset_part {
        Some(offset) => parse_offset_ms(offset)?,
        None => 0,
    };
    Some(ms + offset_ms)
}

fn parse_offset_ms(offset: &str) -> Option<i64> {
    if offset.len() != 5 {
        return None;
    }
    let sign = match &offset[..1] {
        "+" => 1,
        "-" => -1,
        _ => return None,
    };
    let hours: i64 = offset[1..3].parse().ok()?;
    let minutes: i64 = offset[3..5].parse().ok()?;
    Some(sign * (hours * 60 + minutes) * 60_000)
}

/// Format a UTC timestamp as ISO-8601 with second precision and a `Z` suffix,
/// matching the on-disk event log format.
pub fn format_iso_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse an ISO-8601 timestamp into UTC. Accepts a trailing `Z`, an explicit
/// offset, or a naive timestamp (assumed UTC).
pub fn parse_iso8601_utc(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDateTime};

    #[test]
    fn msajax_with_negative_offset() {
        let ms = parse_msajax("/Date(1764922344000-0700)/").unwrap();
        assert_eq!(ms, 1764922344000 - 7 * 3_600_000);
        let dt = DateTime::from_timestamp_millis(ms).unwrap();
        assert_eq!(
            dt.naive_utc(),
            NaiveDateTime::parse_from_str("2025-12-05T01:12:24", "%Y-%m-%dT%H:%M:%S").unwrap()
        );
    }

    #[test]
    fn msajax_with_positive_offset() {
        let ms = parse_msajax("/Date(1000+0130)/").unwrap();
        assert_eq!(ms, 1000 + 90 * 60_000);
    }

    #[test]
    fn msajax_without_offset() {
        assert_eq!(parse_msajax("/Date(1764922344000)/"), Some(1764922344000));
    }

    #[test]
    fn msajax_rejects_garbage() {
        assert_eq!(parse_msajax("Date(1)"), None);
        assert_eq!(parse_msajax("/Date(abc)/"), None);
        assert_eq!(parse_msajax("/Date(10+07)/"), None);
    }

    #[test]
    fn service_day_boundary() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let before = tz.with_ymd_and_hms(2025, 12, 18, 2, 29, 59).unwrap();
        let after = tz.with_ymd_and_hms(2025, 12, 18, 2, 30, 0).unwrap();
        assert_eq!(service_day(before), NaiveDate::from_ymd_opt(2025, 12, 17).unwrap());
        assert_eq!(service_day(after), NaiveDate::from_ymd_opt(2025, 12, 18).unwrap());
    }

    #[test]
    fn iso_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 45).unwrap();
        let text = format_iso_utc(ts);
        assert_eq!(text, "2024-01-01T12:30:45Z");
        assert_eq!(parse_iso8601_utc(&text), Some(ts));
    }
}
