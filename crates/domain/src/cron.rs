//! Minimal 5-field cron evaluator (`min hour dom month dow`), UTC only —
//! schedules in this system carry no timezone field, unlike a dashboard
//! product where users pick one per schedule.

use chrono::{DateTime, Datelike, Timelike, Utc};

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

fn value_in_range(v: u32, range: (u32, u32)) -> bool {
    v >= range.0 && v <= range.1
}

/// Validates field count and that every field parses as `*`, `*/N`, `N`,
/// `N-M`, or a comma-separated list of those, each within that field's
/// valid range (minute 0-59, hour 0-23, day-of-month 1-31, month 1-12,
/// day-of-week 0-6).
pub fn is_valid(cron: &str) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    fields.iter().zip(FIELD_RANGES).all(|(f, range)| {
        *f == "*"
            || f.strip_prefix("*/").map(|n| n.parse::<u32>().map(|n| n > 0).unwrap_or(false)).unwrap_or(false)
            || f.split(',').all(|part| {
                part.parse::<u32>().map(|n| value_in_range(n, range)).unwrap_or(false)
                    || part
                        .split_once('-')
                        .and_then(|(a, b)| Some((a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)))
                        .map(|(a, b)| value_in_range(a, range) && value_in_range(b, range) && a <= b)
                        .unwrap_or(false)
            })
    })
}

/// Next UTC occurrence strictly after `after`, scanning minute-by-minute up
/// to one year out. `None` means the expression never matches (malformed,
/// or an impossible day-of-month/month pairing like `31 2`).
pub fn next_after(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut candidate = (*after + chrono::Duration::minutes(1))
        .with_second(0)
        .unwrap_or(*after)
        .with_nanosecond(0)
        .unwrap_or(*after);

    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if matches_naive(cron, &candidate.naive_utc()) {
            return Some(candidate);
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_minute_matches_everything() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(matches_naive("* * * * *", &dt.naive_utc()));
    }

    #[test]
    fn next_after_skips_to_the_next_matching_minute() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let next = next_after("30 9 * * *", &after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn step_field_matches_every_n() {
        assert!(field_matches("*/15", 30));
        assert!(!field_matches("*/15", 31));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(!is_valid("* * *"));
        assert!(!is_valid("60 * * * *"));
        assert!(is_valid("*/5 9-17 * * 1-5"));
    }
}
