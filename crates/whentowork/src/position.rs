use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Timelike};
use regex::Regex;

/// Position names the paratransit integration keys on.
pub const ONDEMAND_BLOCK_NAMES: [&str; 2] = ["OnDemand Driver", "OnDemand EB"];

fn block_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Block\s*(\d{1,2})\s*(AM|PM)?").unwrap())
}

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{1,2})\]").unwrap())
}

/// Extract the two-digit block number (or on-demand key) and any explicit
/// AM/PM marker from a scheduling position name. The period comes back as
/// `"am"`, `"pm"`, `"any"` (on-demand), or `""` when unstated.
pub fn extract_block_from_position(value: Option<&str>) -> Option<(String, String)> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }

    if text.contains("OnDemand") || text.contains("On Demand") {
        if text.to_uppercase().contains("EB") {
            return Some(("OnDemand EB".to_owned(), "any".to_owned()));
        }
        return Some(("OnDemand Driver".to_owned(), "any".to_owned()));
    }

    if let Some(caps) = block_word_re().captures(text) {
        let number = zero_pad(&caps[1]);
        let period = caps
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        return Some((number, period));
    }

    if let Some(caps) = bracket_re().captures(text) {
        let number = zero_pad(&caps[1]);
        let upper = text.to_uppercase();
        let period = if upper.contains(" AM") {
            "am".to_owned()
        } else if upper.contains(" PM") {
            "pm".to_owned()
        } else {
            String::new()
        };
        return Some((number, period));
    }

    None
}

fn zero_pad(number: &str) -> String {
    format!("{:02}", number.parse::<u32>().unwrap_or(0))
}

/// Compact shift-time label, e.g. `6a` or `2:30p`.
pub fn format_driver_time<Tz: TimeZone>(dt: &DateTime<Tz>) -> String {
    let hour = dt.hour();
    let minute = dt.minute();
    let suffix = if hour < 12 { "a" } else { "p" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    if minute == 0 {
        format!("{display_hour}{suffix}")
    } else {
        format!("{display_hour}:{minute:02}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn block_word_positions() {
        assert_eq!(
            extract_block_from_position(Some("Block 1")),
            Some(("01".into(), "".into()))
        );
        assert_eq!(
            extract_block_from_position(Some("Block 21 AM")),
            Some(("21".into(), "am".into()))
        );
    }

    #[test]
    fn bracket_positions() {
        assert_eq!(
            extract_block_from_position(Some("[05]")),
            Some(("05".into(), "".into()))
        );
        assert_eq!(
            extract_block_from_position(Some("[16] AM")),
            Some(("16".into(), "am".into()))
        );
        assert_eq!(
            extract_block_from_position(Some("[22] PM Relief")),
            Some(("22".into(), "pm".into()))
        );
    }

    #[test]
    fn ondemand_positions() {
        assert_eq!(
            extract_block_from_position(Some("OnDemand Driver")),
            Some(("OnDemand Driver".into(), "any".into()))
        );
        assert_eq!(
            extract_block_from_position(Some("OnDemand EB")),
            Some(("OnDemand EB".into(), "any".into()))
        );
        assert_eq!(
            extract_block_from_position(Some("On Demand eb evening")),
            Some(("OnDemand EB".into(), "any".into()))
        );
    }

    #[test]
    fn unparseable_positions() {
        assert_eq!(extract_block_from_position(Some("Supervisor")), None);
        assert_eq!(extract_block_from_position(Some("")), None);
        assert_eq!(extract_block_from_position(None), None);
    }

    #[test]
    fn compact_time_labels() {
        let six_am = Utc.with_ymd_and_hms(2025, 12, 7, 6, 0, 0).unwrap();
        assert_eq!(format_driver_time(&six_am), "6a");
        let two_thirty_pm = Utc.with_ymd_and_hms(2025, 12, 7, 14, 30, 0).unwrap();
        assert_eq!(format_driver_time(&two_thirty_pm), "2:30p");
        let midnight = Utc.with_ymd_and_hms(2025, 12, 7, 0, 0, 0).unwrap();
        assert_eq!(format_driver_time(&midnight), "12a");
        let noon = Utc.with_ymd_and_hms(2025, 12, 7, 12, 0, 0).unwrap();
        assert_eq!(format_driver_time(&noon), "12p");
    }
}
