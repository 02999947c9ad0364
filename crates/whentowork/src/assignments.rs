use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use model::drivers::{AssignmentsByBlock, Period, ShiftEntry};

use crate::position::{extract_block_from_position, format_driver_time};
use crate::AssignedShift;

/// Color id the schedulers use to mark a no-show; those shifts are dropped.
const NO_SHOW_COLOR_ID: &str = "9";

/// Blocks with separate AM and PM crews.
fn is_am_pm_block(block: &str) -> bool {
    matches!(
        block,
        "20" | "21" | "22" | "23" | "24" | "25" | "26"
    )
}

/// Collapse the raw shift list into per-block, per-period driver entries,
/// sorted by shift start. Already-ended shifts and no-shows are dropped.
pub fn build_driver_assignments(
    shifts: &[AssignedShift],
    now: DateTime<Local>,
) -> AssignmentsByBlock {
    let mut assignments: AssignmentsByBlock = AssignmentsByBlock::new();

    for shift in shifts {
        let Some((block_number, explicit_period)) =
            extract_block_from_position(shift.position_name.as_deref())
        else {
            continue;
        };

        let first = shift.first_name.as_deref().unwrap_or("").trim();
        let last = shift.last_name.as_deref().unwrap_or("").trim();
        let name = match format!("{first} {last}").trim() {
            "" => "OPEN".to_owned(),
            joined => joined.to_owned(),
        };

        let Some(start_dt) =
            parse_shift_datetime(shift.start_date.as_deref(), shift.start_time.as_deref())
        else {
            continue;
        };

        let mut end_dt =
            parse_shift_datetime(shift.end_date.as_deref(), shift.end_time.as_deref());
        if end_dt.is_none() {
            if let Some(hours) = parse_duration_hours(shift.duration.as_ref()) {
                end_dt =
                    Some(start_dt + Duration::milliseconds((hours * 3_600_000.0) as i64));
            }
        }
        let Some(mut end_dt) = end_dt else { continue };
        if end_dt <= start_dt {
            end_dt += Duration::days(1);
        }
        if end_dt <= now {
            continue;
        }

        let period = resolve_period(&block_number, &explicit_period, &start_dt);

        let color_id = normalize_color_id(shift.color_id.as_ref());
        if color_id.as_deref() == Some(NO_SHOW_COLOR_ID) {
            continue;
        }

        let entry = ShiftEntry {
            name,
            start_ts: start_dt.timestamp_millis(),
            end_ts: end_dt.timestamp_millis(),
            start_label: format_driver_time(&start_dt),
            end_label: format_driver_time(&end_dt),
            color_id,
            position_name: shift.position_name.clone(),
        };

        assignments
            .entry(block_number)
            .or_default()
            .entry(period)
            .or_default()
            .push(entry);
    }

    for periods in assignments.values_mut() {
        for drivers in periods.values_mut() {
            drivers.sort_by_key(|entry| entry.start_ts);
        }
    }

    assignments
}

fn resolve_period(block: &str, explicit: &str, start: &DateTime<Local>) -> Period {
    let inferred = match explicit {
        "am" => Period::Am,
        "pm" => Period::Pm,
        "any" => return Period::Any,
        _ => {
            if start.hour() < 12 {
                Period::Am
            } else {
                Period::Pm
            }
        }
    };
    if is_am_pm_block(block) {
        inferred
    } else {
        Period::Any
    }
}

/// Parse the feed's split date and time strings into a local timestamp.
pub fn parse_shift_datetime(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Local>> {
    let date_s = date?.trim();
    let time_s = time?.trim();
    if date_s.is_empty() || time_s.is_empty() {
        return None;
    }

    let date_part = ["%m/%d/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_s, fmt).ok())?;
    let time_part = ["%I:%M %p", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time_s, fmt).ok())?;

    Local
        .from_local_datetime(&date_part.and_time(time_part))
        .earliest()
}

fn parse_duration_hours(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_color_id(value: Option<&serde_json::Value>) -> Option<String> {
    let text = match value? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_owned(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(
        position: &str,
        first: &str,
        last: &str,
        start: (&str, &str),
        end: (&str, &str),
        color: Option<&str>,
    ) -> AssignedShift {
        AssignedShift {
            position_name: Some(position.to_owned()),
            first_name: Some(first.to_owned()),
            last_name: Some(last.to_owned()),
            start_date: Some(start.0.to_owned()),
            start_time: Some(start.1.to_owned()),
            end_date: Some(end.0.to_owned()),
            end_time: Some(end.1.to_owned()),
            duration: None,
            color_id: color.map(|c| serde_json::Value::String(c.to_owned())),
        }
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn builds_am_pm_buckets_for_split_blocks() {
        let now = local(2025, 12, 7, 5, 0);
        let shifts = vec![
            shift(
                "Block 21 AM",
                "John",
                "Doe",
                ("12/7/2025", "6:00 AM"),
                ("12/7/2025", "12:00 PM"),
                Some("0"),
            ),
            shift(
                "Block 21 PM",
                "Jane",
                "Smith",
                ("12/7/2025", "1:00 PM"),
                ("12/7/2025", "6:00 PM"),
                Some("1"),
            ),
        ];
        let assignments = build_driver_assignments(&shifts, now);
        let block = assignments.get("21").unwrap();
        assert_eq!(block.get(&Period::Am).unwrap()[0].name, "John Doe");
        assert_eq!(block.get(&Period::Pm).unwrap()[0].name, "Jane Smith");
    }

    #[test]
    fn non_split_blocks_collapse_to_any() {
        let now = local(2025, 12, 7, 5, 0);
        let shifts = vec![shift(
            "[04]",
            "Bob",
            "Johnson",
            ("12/7/2025", "6:00 AM"),
            ("12/7/2025", "6:00 PM"),
            Some("2"),
        )];
        let assignments = build_driver_assignments(&shifts, now);
        let block = assignments.get("04").unwrap();
        assert!(block.contains_key(&Period::Any));
    }

    #[test]
    fn no_show_and_finished_shifts_are_dropped() {
        let now = local(2025, 12, 7, 20, 0);
        let shifts = vec![
            shift(
                "[05]",
                "No",
                "Show",
                ("12/7/2025", "6:00 AM"),
                ("12/7/2025", "11:00 PM"),
                Some("9"),
            ),
            shift(
                "[06]",
                "Gone",
                "Home",
                ("12/7/2025", "6:00 AM"),
                ("12/7/2025", "10:00 AM"),
                Some("0"),
            ),
        ];
        let assignments = build_driver_assignments(&shifts, now);
        assert!(assignments.is_empty());
    }

    #[test]
    fn overnight_shift_rolls_end_into_next_day() {
        let now = local(2025, 12, 7, 22, 0);
        let shifts = vec![shift(
            "[03]",
            "Night",
            "Owl",
            ("12/7/2025", "9:00 PM"),
            ("12/7/2025", "2:00 AM"),
            None,
        )];
        let assignments = build_driver_assignments(&shifts, now);
        let entry = &assignments.get("03").unwrap().get(&Period::Any).unwrap()[0];
        assert!(entry.end_ts > entry.start_ts);
        assert_eq!(entry.end_ts - entry.start_ts, 5 * 3_600_000);
    }

    #[test]
    fn duration_fallback_fills_missing_end() {
        let now = local(2025, 12, 7, 5, 0);
        let mut s = shift(
            "[02]",
            "Dur",
            "Ation",
            ("12/7/2025", "6:00 AM"),
            ("", ""),
            None,
        );
        s.end_date = None;
        s.end_time = None;
        s.duration = Some(serde_json::Value::String("8".into()));
        let assignments = build_driver_assignments(&[s], now);
        let entry = &assignments.get("02").unwrap().get(&Period::Any).unwrap()[0];
        assert_eq!(entry.end_ts - entry.start_ts, 8 * 3_600_000);
    }

    #[test]
    fn open_shift_gets_placeholder_name() {
        let now = local(2025, 12, 7, 5, 0);
        let mut s = shift(
            "[01]",
            "",
            "",
            ("12/7/2025", "6:00 AM"),
            ("12/7/2025", "12:00 PM"),
            None,
        );
        s.first_name = None;
        s.last_name = None;
        let assignments = build_driver_assignments(&[s], now);
        let entry = &assignments.get("01").unwrap().get(&Period::Any).unwrap()[0];
        assert_eq!(entry.name, "OPEN");
    }
}
