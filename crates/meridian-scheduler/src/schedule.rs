//! Schedule grammar.
//!
//! Supported expressions (parsed before storage; each parse yields the next
//! fire instant in UTC):
//!   `every 6h` / `every 30m` / `every 2d`
//!   `every day at 9am` / `every day at 09:00`
//!   `every monday` / `every friday at 5pm`
//!   `at 09:00` / `at 3pm`                (one-shot)
//!   `cron 0 */6 * * *`                   (standard five-field)

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use regex::Regex;

static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^every\s+(\d+)\s*(h|hr|hours?|m|min|minutes?|d|days?)\s*$").expect("valid pattern")
});

static DAILY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^every\s+day\s+at\s+(.+)$").expect("valid pattern"));

static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^every\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)(?:\s+at\s+(.+))?$",
    )
    .expect("valid pattern")
});

static AT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^at\s+(.+)$").expect("valid pattern"));

static CRON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cron\s+(.+)$").expect("valid pattern"));

static TIME_AMPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,2})\s*(am|pm)$").expect("valid pattern"));

static TIME_AMPM_FULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,2}):(\d{2})\s*(am|pm)$").expect("valid pattern"));

static TIME_24H_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid pattern"));

/// Whether a schedule fires once and then disables (`at <time>`).
pub fn is_one_shot(schedule: &str) -> bool {
    schedule.trim().to_lowercase().starts_with("at ")
}

/// Compute the next fire instant after `from`. `None` means the expression
/// could not be parsed (surfaced to callers as a parse error).
pub fn next_run(schedule: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = schedule.trim().to_lowercase();

    if let Some(caps) = INTERVAL_RE.captures(&schedule) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = match &caps[2][..1] {
            "h" => Duration::hours(amount),
            "m" => Duration::minutes(amount),
            "d" => Duration::days(amount),
            _ => return None,
        };
        return Some(from + delta);
    }

    if let Some(caps) = DAILY_RE.captures(&schedule) {
        let (hour, minute) = parse_time(&caps[1])?;
        let candidate = at_time(from, hour, minute)?;
        return Some(if candidate <= from {
            candidate + Duration::days(1)
        } else {
            candidate
        });
    }

    if let Some(caps) = WEEKDAY_RE.captures(&schedule) {
        let target_day = weekday_index(&caps[1])?;
        let (hour, minute) = match caps.get(2) {
            Some(t) => parse_time(t.as_str())?,
            None => (9, 0),
        };
        let today = from.weekday().num_days_from_monday() as i64;
        let mut days_ahead = target_day - today;
        if days_ahead < 0 {
            days_ahead += 7;
        }
        let mut candidate = at_time(from, hour, minute)? + Duration::days(days_ahead);
        if candidate <= from {
            candidate += Duration::days(7);
        }
        return Some(candidate);
    }

    if let Some(caps) = AT_RE.captures(&schedule) {
        let (hour, minute) = parse_time(&caps[1])?;
        let candidate = at_time(from, hour, minute)?;
        return Some(if candidate <= from {
            candidate + Duration::days(1)
        } else {
            candidate
        });
    }

    if let Some(caps) = CRON_RE.captures(&schedule) {
        return next_cron(&caps[1], from);
    }

    None
}

/// Parse `9am`, `3:30pm`, `09:00`, `17:30` into (hour, minute).
fn parse_time(text: &str) -> Option<(u32, u32)> {
    let text = text.trim();

    if let Some(caps) = TIME_AMPM_RE.captures(text) {
        let mut h: u32 = caps[1].parse().ok()?;
        let pm = caps[2].eq_ignore_ascii_case("pm");
        if pm && h != 12 {
            h += 12;
        } else if !pm && h == 12 {
            h = 0;
        }
        return valid_time(h, 0);
    }

    if let Some(caps) = TIME_AMPM_FULL_RE.captures(text) {
        let mut h: u32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let pm = caps[3].eq_ignore_ascii_case("pm");
        if pm && h != 12 {
            h += 12;
        } else if !pm && h == 12 {
            h = 0;
        }
        return valid_time(h, m);
    }

    if let Some(caps) = TIME_24H_RE.captures(text) {
        let h: u32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        return valid_time(h, m);
    }

    None
}

fn valid_time(hour: u32, minute: u32) -> Option<(u32, u32)> {
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn weekday_index(name: &str) -> Option<i64> {
    let idx = match name {
        "monday" => 0,
        "tuesday" => 1,
        "wednesday" => 2,
        "thursday" => 3,
        "friday" => 4,
        "saturday" => 5,
        "sunday" => 6,
        _ => return None,
    };
    Some(idx)
}

/// `from`'s date at HH:MM:00 UTC.
fn at_time(from: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(from.year(), from.month(), from.day(), hour, minute, 0)
        .single()
}

/// Standard five-field cron: minute hour day-of-month month day-of-week.
///
/// Scans forward minute-by-minute up to one year. Day-of-week follows the
/// stored-source convention of 0 = Monday.
fn next_cron(expr: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let minutes = expand_field(fields[0], 0, 59)?;
    let hours = expand_field(fields[1], 0, 23)?;
    let days = expand_field(fields[2], 1, 31)?;
    let months = expand_field(fields[3], 1, 12)?;
    let weekdays = expand_field(fields[4], 0, 6)?;

    let mut candidate = now
        .with_second(0)?
        .with_nanosecond(0)?
        + Duration::minutes(1);

    // ~1 year in minutes
    for _ in 0..525_960 {
        if minutes.contains(&candidate.minute())
            && hours.contains(&candidate.hour())
            && days.contains(&candidate.day())
            && months.contains(&candidate.month())
            && weekdays.contains(&candidate.weekday().num_days_from_monday())
        {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }

    None
}

/// Expand one cron field (`*`, `*/n`, `a-b`, `a,b,c`, `n`) into its values.
fn expand_field(field: &str, lo: u32, hi: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((lo..=hi).collect());
    }
    if let Some((base, step)) = field.split_once('/') {
        let start = if base == "*" { lo } else { base.parse().ok()? };
        let step: u32 = step.parse().ok()?;
        if step == 0 {
            return None;
        }
        return Some((start..=hi).step_by(step as usize).collect());
    }
    if let Some((a, b)) = field.split_once('-') {
        let a: u32 = a.parse().ok()?;
        let b: u32 = b.parse().ok()?;
        return Some((a..=b).collect());
    }
    if field.contains(',') {
        return field.split(',').map(|x| x.parse().ok()).collect();
    }
    field.parse().ok().map(|v: u32| vec![v])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn interval_hours() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(next_run("every 6h", t0), Some(utc(2026, 2, 17, 18, 0)));
    }

    #[test]
    fn interval_minutes_and_days() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(next_run("every 30m", t0), Some(utc(2026, 2, 17, 12, 30)));
        assert_eq!(next_run("every 2d", t0), Some(utc(2026, 2, 19, 12, 0)));
    }

    #[test]
    fn daily_before_and_after_target() {
        let morning = utc(2026, 2, 17, 7, 0);
        assert_eq!(
            next_run("every day at 9am", morning),
            Some(utc(2026, 2, 17, 9, 0))
        );
        let evening = utc(2026, 2, 17, 22, 0);
        assert_eq!(
            next_run("every day at 9am", evening),
            Some(utc(2026, 2, 18, 9, 0))
        );
    }

    #[test]
    fn weekday_defaults_to_nine() {
        // 2026-02-17 is a Tuesday.
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(next_run("every monday", t0), Some(utc(2026, 2, 23, 9, 0)));
    }

    #[test]
    fn weekday_with_time() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(
            next_run("every friday at 5pm", t0),
            Some(utc(2026, 2, 20, 17, 0))
        );
    }

    #[test]
    fn weekday_same_day_past_time_rolls_a_week() {
        // "every tuesday" (default 09:00) asked on a Tuesday afternoon.
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(next_run("every tuesday", t0), Some(utc(2026, 2, 24, 9, 0)));
    }

    #[test]
    fn weekday_same_day_future_time_fires_today() {
        let t0 = utc(2026, 2, 17, 7, 0);
        assert_eq!(next_run("every tuesday", t0), Some(utc(2026, 2, 17, 9, 0)));
    }

    #[test]
    fn one_shot_at() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(next_run("at 15:30", t0), Some(utc(2026, 2, 17, 15, 30)));
        assert_eq!(next_run("at 09:00", t0), Some(utc(2026, 2, 18, 9, 0)));
        assert!(is_one_shot("at 09:00"));
        assert!(!is_one_shot("every day at 09:00"));
    }

    #[test]
    fn cron_every_six_hours() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(
            next_run("cron 0 */6 * * *", t0),
            Some(utc(2026, 2, 17, 18, 0))
        );
    }

    #[test]
    fn cron_lists_and_ranges() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert_eq!(
            next_run("cron 15,45 * * * *", t0),
            Some(utc(2026, 2, 17, 12, 15))
        );
        assert_eq!(
            next_run("cron 0 9-11 * * *", utc(2026, 2, 17, 12, 0)),
            Some(utc(2026, 2, 18, 9, 0))
        );
    }

    #[test]
    fn cron_requires_five_fields() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert!(next_run("cron 0 * *", t0).is_none());
    }

    #[test]
    fn next_is_always_strictly_later() {
        let t0 = utc(2026, 2, 17, 9, 0);
        for expr in [
            "every 1h",
            "every day at 9am",
            "every tuesday at 9am",
            "at 9am",
            "cron 0 9 * * *",
        ] {
            let next = next_run(expr, t0).unwrap();
            assert!(next > t0, "{expr} produced {next} <= {t0}");
        }
    }

    #[test]
    fn ampm_parsing() {
        assert_eq!(parse_time("9am"), Some((9, 0)));
        assert_eq!(parse_time("12am"), Some((0, 0)));
        assert_eq!(parse_time("12pm"), Some((12, 0)));
        assert_eq!(parse_time("3:30pm"), Some((15, 30)));
        assert_eq!(parse_time("17:45"), Some((17, 45)));
        assert_eq!(parse_time("banana"), None);
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn unknown_schedule_is_a_parse_error() {
        let t0 = utc(2026, 2, 17, 12, 0);
        assert!(next_run("whenever you feel like it", t0).is_none());
    }
}
