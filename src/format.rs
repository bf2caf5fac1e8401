use chrono::{DateTime, Local};
use std::fmt::Display;
use std::time::Duration;

pub const NA: &str = "N/A";

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        // anything that would print as 1024.00 belongs to the next unit
        if value < 1023.995 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}

pub fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1}%"))
        .unwrap_or_else(|| NA.to_string())
}

const SECS_PER_DAY: u64 = 86_400;

pub fn format_uptime(secs: u64) -> String {
    let days = secs / SECS_PER_DAY;
    let rest = Duration::from_secs(secs % SECS_PER_DAY);
    match days {
        0 => humantime::format_duration(rest).to_string(),
        _ if rest.is_zero() => format!("{days}{}", day_unit(days)),
        _ => format!(
            "{days}{} {}",
            day_unit(days),
            humantime::format_duration(rest)
        ),
    }
}

fn day_unit(days: u64) -> &'static str {
    if days == 1 {
        "day"
    } else {
        "days"
    }
}

pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn or_na<T: Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NA.to_string())
}

pub fn percent_of(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        return None;
    }
    Some(round1(part as f64 / whole as f64 * 100.0))
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_scaled_with_two_decimals() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
        assert_eq!(format_bytes(1024_u64.pow(5)), "1.00 PB");
        assert_eq!(format_bytes(1024_u64.pow(6)), "1024.00 PB");
    }

    #[test]
    fn values_that_round_up_move_to_the_next_unit() {
        assert_eq!(format_bytes(1_048_575), "1.00 MB");
        assert_eq!(format_bytes(1_048_570), "1023.99 KB");
        assert_eq!(format_bytes(1024_u64.pow(4) - 1), "1.00 TB");
    }

    #[test]
    fn scaled_magnitude_stays_below_1024_until_top_unit() {
        let boundaries = [1023, 1_048_575, 1_073_741_823, 1_099_511_627_775];
        let samples = [1_u64, 999, 4096, 1_000_000, 7_340_032_000, u64::MAX / 4096];
        for bytes in boundaries.into_iter().chain(samples) {
            let text = format_bytes(bytes);
            let (number, unit) = text.split_once(' ').expect("value and unit");
            let number: f64 = number.parse().expect("numeric part");
            if unit != "PB" {
                assert!(number < 1024.0, "{text}");
            }
            let decimals = text.split_once('.').map(|(_, rest)| rest.len() - unit.len() - 1);
            assert_eq!(decimals, Some(2), "{text}");
        }
    }

    #[test]
    fn uptime_has_no_subsecond_part() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(59), "59s");
        assert_eq!(format_uptime(3_661), "1h 1m 1s");
        assert_eq!(format_uptime(90_061), "1day 1h 1m 1s");
    }

    #[test]
    fn long_uptime_counts_days_only() {
        let secs = 45 * 86_400 + 3 * 3600 + 4 * 60 + 5;
        assert_eq!(format_uptime(secs), "45days 3h 4m 5s");
        assert_eq!(format_uptime(400 * 86_400), "400days");
        assert_eq!(format_uptime(86_400 + 7), "1day 7s");
        assert!(!format_uptime(90 * 86_400 + 1).contains("month"));
    }

    #[test]
    fn missing_values_render_as_na() {
        assert_eq!(format_percent(None), "N/A");
        assert_eq!(format_percent(Some(42.26)), "42.3%");
        assert_eq!(or_na::<u32>(None), "N/A");
        assert_eq!(or_na(Some(8)), "8");
    }

    #[test]
    fn percent_of_zero_total_is_unknown() {
        assert_eq!(percent_of(5, 0), None);
        assert_eq!(percent_of(1, 3), Some(33.3));
    }
}
