use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Default pattern for `format_date`, e.g. "Mar 05, 2024"
pub const DEFAULT_DATE_FORMAT: &str = "%b %d, %Y";

/// Formats accepted for dates without a UTC offset
const NAIVE_DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

const MINUTES_IN_HOUR: i64 = 60;
const MINUTES_IN_DAY: i64 = 1440;
const MINUTES_IN_MONTH: i64 = 43200;
const MINUTES_IN_TWO_MONTHS: i64 = 86400;

// ============================================================================
// Parsing
// ============================================================================

fn parse_zoned(date: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(date).ok()
}

fn parse_naive(date: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(date, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Wall-clock time as written in the input
fn parse_wall_clock(date: &str) -> Option<NaiveDateTime> {
    parse_zoned(date)
        .map(|dt| dt.naive_local())
        .or_else(|| parse_naive(date))
}

/// Absolute instant; dates without an offset are taken as local time
fn parse_instant(date: &str) -> Option<DateTime<Utc>> {
    parse_zoned(date)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            parse_naive(date)
                .and_then(|naive| Local.from_local_datetime(&naive).earliest())
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Values that can be shown as numbers. Strings are read like a lenient
/// number parser: leading whitespace is skipped and trailing junk ignored,
/// so `"12.5 hrs"` reads as 12.5.
pub trait NumericInput {
    fn to_number(&self) -> Option<f64>;
}

impl NumericInput for f64 {
    fn to_number(&self) -> Option<f64> {
        Some(*self).filter(|v| v.is_finite())
    }
}

impl NumericInput for i64 {
    fn to_number(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

impl NumericInput for &str {
    fn to_number(&self) -> Option<f64> {
        let s = self.trim_start();
        let end = s
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        (1..=end)
            .rev()
            .find_map(|len| s[..len].parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

impl NumericInput for String {
    fn to_number(&self) -> Option<f64> {
        self.as_str().to_number()
    }
}

impl<T: NumericInput> NumericInput for Option<T> {
    fn to_number(&self) -> Option<f64> {
        self.as_ref().and_then(NumericInput::to_number)
    }
}

// ============================================================================
// Dates
// ============================================================================

/// Format a date string as e.g. "Mar 05, 2024".
/// Returns an empty string for empty or unrecognized input.
pub fn format_date(date: &str) -> String {
    format_date_with(date, DEFAULT_DATE_FORMAT)
}

/// Format a date string with a chrono strftime pattern.
/// Accepts RFC 3339 timestamps and `YYYY-MM-DD[ HH:MM:SS]` forms.
pub fn format_date_with(date: &str, pattern: &str) -> String {
    let date = date.trim();
    if date.is_empty() {
        return String::new();
    }

    let Some(wall_clock) = parse_wall_clock(date) else {
        warn!(date, "Date formatting error: unrecognized date");
        return String::new();
    };

    let mut out = String::new();
    if write!(out, "{}", wall_clock.format(pattern)).is_err() {
        warn!(pattern, "Date formatting error: invalid pattern");
        return String::new();
    }
    out
}

/// Describe how long ago (or how far ahead) `date` is, e.g. "5 minutes ago"
/// or "in about 2 hours"
pub fn format_relative_time(date: &str) -> String {
    format_relative_time_from(date, Utc::now())
}

/// `format_relative_time` measured from a fixed `now`
pub fn format_relative_time_from(date: &str, now: DateTime<Utc>) -> String {
    let date = date.trim();
    if date.is_empty() {
        return String::new();
    }

    let Some(instant) = parse_instant(date) else {
        warn!(date, "Relative time formatting error: unrecognized date");
        return String::new();
    };

    let seconds = (now - instant).num_seconds();
    let phrase = distance_phrase(seconds.abs());
    if seconds >= 0 {
        format!("{} ago", phrase)
    } else {
        format!("in {}", phrase)
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

fn distance_phrase(seconds: i64) -> String {
    let minutes = (seconds as f64 / 60.0).round() as i64;

    if minutes < 1 {
        "less than a minute".to_string()
    } else if minutes < 45 {
        plural(minutes, "minute")
    } else if minutes < 90 {
        "about 1 hour".to_string()
    } else if minutes < MINUTES_IN_DAY {
        let hours = (minutes as f64 / MINUTES_IN_HOUR as f64).round() as i64;
        format!("about {}", plural(hours, "hour"))
    } else if minutes < 2520 {
        // Up to 42 hours still reads as a single day
        "1 day".to_string()
    } else if minutes < MINUTES_IN_MONTH {
        let days = (minutes as f64 / MINUTES_IN_DAY as f64).round() as i64;
        plural(days, "day")
    } else if minutes < MINUTES_IN_TWO_MONTHS {
        let months = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        format!("about {}", plural(months, "month"))
    } else {
        let months = minutes / MINUTES_IN_MONTH;
        if months < 12 {
            let nearest = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
            plural(nearest, "month")
        } else {
            let years = months / 12;
            match months % 12 {
                0..=2 => format!("about {}", plural(years, "year")),
                3..=8 => format!("over {}", plural(years, "year")),
                _ => format!("almost {}", plural(years + 1, "year")),
            }
        }
    }
}

// ============================================================================
// Durations and numbers
// ============================================================================

/// Format a minute count as "45m", "2h" or "1h 30m". Missing counts read as 0.
pub fn format_minutes_to_hours(minutes: impl Into<Option<i64>>) -> String {
    let minutes = minutes.into().unwrap_or(0);
    if minutes < MINUTES_IN_HOUR {
        return format!("{}m", minutes);
    }

    let hours = minutes / MINUTES_IN_HOUR;
    let remaining = minutes % MINUTES_IN_HOUR;
    if remaining > 0 {
        format!("{}h {}m", hours, remaining)
    } else {
        format!("{}h", hours)
    }
}

/// Format an hour value with one decimal place; non-numbers show as "0.0"
pub fn format_hours<V: NumericInput>(value: V) -> String {
    match value.to_number() {
        Some(v) => fixed_1(v),
        None => "0.0".to_string(),
    }
}

/// Compact display for large numbers: "1.5M", "12.3k", "1,234" or "12.5".
/// Non-numbers show as "0".
pub fn format_large_number<V: NumericInput>(value: V) -> String {
    let Some(v) = value.to_number() else {
        return "0".to_string();
    };

    if v >= 1_000_000.0 {
        format!("{}M", fixed_1(v / 1_000_000.0))
    } else if v >= 10_000.0 {
        format!("{}k", fixed_1(v / 1_000.0))
    } else if v >= 1_000.0 {
        group_thousands((v + 0.5).floor() as i64)
    } else {
        fixed_1(v)
    }
}

/// One decimal place, with exact ties rounded away from zero.
/// `{:.1}` rounds them to even; odd quarters are the only exact ties.
fn fixed_1(v: f64) -> String {
    let quarters = v * 4.0;
    if quarters.fract() == 0.0 && quarters % 2.0 != 0.0 {
        format!("{:.1}", (v * 10.0).round() / 10.0)
    } else {
        format!("{:.1}", v)
    }
}

/// Insert comma separators: 1234567 -> "1,234,567"
fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
