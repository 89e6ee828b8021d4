//! Time-of-day normalization and business-timezone clock.
//!
//! Every stored or compared time of day is the canonical `HH:MM:SS` string,
//! so lexicographic comparison equals chronological comparison. "Now" is
//! always derived from an explicit UTC instant projected into the business
//! timezone, never from the host's local clock.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Timezone used when `BUSINESS_TIMEZONE` is not configured.
pub const DEFAULT_BUSINESS_TZ: Tz = chrono_tz::America::Argentina::Buenos_Aires;

const SECS_PER_DAY: u32 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("formato de hora inválido: {0:?}")]
    InvalidFormat(String),
}

/// Normalize `HH:MM`, `HH:MM:SS` or an ISO datetime into `HH:MM:SS`.
pub fn normalize_time(input: &str) -> Result<String, TimeError> {
    let secs = parse_seconds(input)?;
    Ok(format_seconds(secs))
}

/// Add minutes to a time of day. Wraps past midnight without carrying a day;
/// use [`crosses_midnight`] to detect the wrap.
pub fn add_minutes_to_time(time: &str, minutes: u32) -> Result<String, TimeError> {
    let secs = parse_seconds(time)?;
    let total = (secs as u64 + minutes as u64 * 60) % SECS_PER_DAY as u64;
    Ok(format_seconds(total as u32))
}

/// True when `time + minutes` reaches or passes the next midnight.
pub fn crosses_midnight(time: &str, minutes: u32) -> Result<bool, TimeError> {
    let secs = parse_seconds(time)?;
    Ok(secs as u64 + minutes as u64 * 60 >= SECS_PER_DAY as u64)
}

/// Weekday index with 0 = Sunday.
pub fn weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

pub fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

/// Projects UTC instants into the fixed business timezone.
#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    tz: Tz,
}

impl BusinessClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Calendar date in the business timezone at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Seconds since local midnight in the business timezone at `now`.
    pub fn seconds_since_midnight(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.tz).num_seconds_from_midnight()
    }
}

impl Default for BusinessClock {
    fn default() -> Self {
        Self::new(DEFAULT_BUSINESS_TZ)
    }
}

pub(crate) fn parse_seconds(input: &str) -> Result<u32, TimeError> {
    let invalid = || TimeError::InvalidFormat(input.to_string());
    let trimmed = input.trim();

    let clock = match iso_time_part(trimmed) {
        Some(part) => part,
        None => trimmed,
    };

    let (h, m, s) = parse_clock(clock).ok_or_else(invalid)?;
    Ok(h * 3600 + m * 60 + s)
}

/// Extracts the `HH:MM[:SS]` part of an ISO datetime, dropping fractional
/// seconds and any zone designator.
fn iso_time_part(input: &str) -> Option<&str> {
    if input.len() < 11 || !input.is_char_boundary(10) {
        return None;
    }
    let (date, rest) = input.split_at(10);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let rest = rest.strip_prefix('T').or_else(|| rest.strip_prefix(' '))?;

    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == ':'))
        .unwrap_or(rest.len());
    let (clock, suffix) = rest.split_at(end);

    let suffix_ok = suffix.is_empty()
        || suffix.starts_with('.')
        || suffix.starts_with('Z')
        || suffix.starts_with('+')
        || suffix.starts_with('-');
    suffix_ok.then_some(clock)
}

fn parse_clock(clock: &str) -> Option<(u32, u32, u32)> {
    let parts: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m] => (*h, *m, "00"),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    if h.is_empty() || h.len() > 2 || m.len() != 2 || s.len() != 2 {
        return None;
    }
    let all_digits = h
        .chars()
        .chain(m.chars())
        .chain(s.chars())
        .all(|c| c.is_ascii_digit());
    if !all_digits {
        return None;
    }

    let (h, m, s): (u32, u32, u32) = (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
    (h < 24 && m < 60 && s < 60).then_some((h, m, s))
}

pub(crate) fn format_seconds(secs: u32) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ── normalize_time ──

    #[test]
    fn test_normalize_short_form() {
        assert_eq!(normalize_time("10:00").unwrap(), "10:00:00");
    }

    #[test]
    fn test_normalize_single_digit_hour() {
        assert_eq!(normalize_time("9:30").unwrap(), "09:30:00");
    }

    #[test]
    fn test_normalize_full_form_unchanged() {
        assert_eq!(normalize_time("17:45:10").unwrap(), "17:45:10");
    }

    #[test]
    fn test_normalize_iso_datetime() {
        assert_eq!(normalize_time("2026-03-02T10:15:00").unwrap(), "10:15:00");
    }

    #[test]
    fn test_normalize_iso_with_zone_and_millis() {
        assert_eq!(
            normalize_time("2026-03-02T10:15:30.000Z").unwrap(),
            "10:15:30"
        );
        assert_eq!(
            normalize_time("2026-03-02T08:05-03:00").unwrap(),
            "08:05:00"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_time("garbage"),
            Err(TimeError::InvalidFormat(_))
        ));
        assert!(normalize_time("").is_err());
        assert!(normalize_time("10").is_err());
        assert!(normalize_time("10:5").is_err());
    }

    #[test]
    fn test_normalize_rejects_out_of_range() {
        assert!(normalize_time("24:00").is_err());
        assert!(normalize_time("12:60").is_err());
        assert!(normalize_time("12:00:75").is_err());
    }

    #[test]
    fn test_normalize_rejects_trailing_text() {
        assert!(normalize_time("10:00am").is_err());
        assert!(normalize_time("2026-03-02T10:00abc").is_err());
    }

    // ── add_minutes_to_time ──

    #[test]
    fn test_add_minutes_basic() {
        assert_eq!(add_minutes_to_time("10:00", 30).unwrap(), "10:30:00");
    }

    #[test]
    fn test_add_minutes_cross_hour() {
        assert_eq!(add_minutes_to_time("10:45:00", 30).unwrap(), "11:15:00");
    }

    #[test]
    fn test_add_minutes_wraps_without_day() {
        assert_eq!(add_minutes_to_time("23:45", 30).unwrap(), "00:15:00");
    }

    #[test]
    fn test_crosses_midnight() {
        assert!(crosses_midnight("23:45", 30).unwrap());
        assert!(crosses_midnight("23:30", 30).unwrap());
        assert!(!crosses_midnight("23:00", 30).unwrap());
    }

    // ── calendar ──

    #[test]
    fn test_weekday_index_sunday_is_zero() {
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(weekday_index(sunday), 0);
        assert_eq!(weekday_index(saturday), 6);
    }

    // ── BusinessClock ──

    #[test]
    fn test_clock_today_uses_business_zone() {
        let clock = BusinessClock::default();
        // 02:00 UTC is still the previous evening in Buenos Aires (UTC-3).
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        assert_eq!(clock.today(now), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(clock.seconds_since_midnight(now), 23 * 3600);
    }

    #[test]
    fn test_clock_other_zone() {
        let clock = BusinessClock::new(chrono_tz::Europe::Madrid);
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 23, 30, 0).unwrap();
        assert_eq!(clock.today(now), NaiveDate::from_ymd_opt(2026, 1, 11).unwrap());
    }
}
