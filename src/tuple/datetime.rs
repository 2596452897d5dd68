//! `YYYY-MM-DD HH:MM:SS` text for DATETIME values, always UTC.

use crate::common::{DbError, Result};

const SECONDS_PER_DAY: i64 = 86_400;

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Days from 1970-01-01 to the given civil date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date of the given day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

fn invalid(s: &str) -> DbError {
    DbError::InvalidCast {
        from: format!("'{}'", s),
        to: "DateTime".to_string(),
    }
}

fn field<T: std::str::FromStr>(s: &str, part: &str) -> Result<T> {
    part.parse().map_err(|_| invalid(s))
}

/// Parses `YYYY-MM-DD HH:MM:SS` (or just `YYYY-MM-DD`) into Unix seconds.
pub fn parse_datetime(s: &str) -> Result<i64> {
    let text = s.trim();
    let (date, time) = match text.split_once([' ', 'T']) {
        Some((date, time)) => (date, Some(time)),
        None => (text, None),
    };

    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 || parts[0].is_empty() {
        return Err(invalid(s));
    }
    let year: i64 = field(s, parts[0])?;
    let month: u32 = field(s, parts[1])?;
    let day: u32 = field(s, parts[2])?;
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return Err(invalid(s));
    }

    let mut seconds = 0i64;
    if let Some(time) = time {
        let parts: Vec<&str> = time.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid(s));
        }
        let hour: i64 = field(s, parts[0])?;
        let minute: i64 = field(s, parts[1])?;
        let second: i64 = field(s, parts[2])?;
        if hour > 23 || minute > 59 || second > 59 || hour < 0 || minute < 0 || second < 0 {
            return Err(invalid(s));
        }
        seconds = hour * 3600 + minute * 60 + second;
    }

    days_from_civil(year, month, day)
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|d| d.checked_add(seconds))
        .ok_or_else(|| invalid(s))
}

/// Formats Unix seconds as `YYYY-MM-DD HH:MM:SS`.
pub fn format_datetime(seconds: i64) -> String {
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    let rem = seconds.rem_euclid(SECONDS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}
