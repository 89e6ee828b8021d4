//! Slot legality: working hours, past-time and overlap checks.
//!
//! All times are canonical `HH:MM:SS` strings (see [`crate::time`]), so the
//! half-open interval tests below compare strings directly, both here and in
//! SQL.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{AppError, AppResult},
    models::{TimeBlock, WorkingHours},
    time::{self, BusinessClock},
};

/// SQL predicate matching live appointments overlapping `[start, end)`.
/// Binds: professional_id, date, requested end, requested start.
pub(crate) const LIVE_OVERLAP_SQL: &str = "professional_id = ? AND date = ?
      AND status IN ('pending', 'confirmed')
      AND start_time < ? AND end_time > ?";

/// Reference instant and lead-time buffer for the "already passed" check.
#[derive(Debug, Clone, Copy)]
pub struct SlotPolicy {
    pub clock: BusinessClock,
    pub now: DateTime<Utc>,
    pub buffer_min: u32,
}

/// Half-open overlap: `[a_start, a_end)` and `[b_start, b_end)` intersect.
pub fn overlaps(a_start: &str, a_end: &str, b_start: &str, b_end: &str) -> bool {
    a_start < b_end && a_end > b_start
}

pub async fn load_working_hours(
    db: &SqlitePool,
    professional_id: i64,
    weekday: u32,
) -> Result<Option<WorkingHours>, sqlx::Error> {
    sqlx::query_as::<_, WorkingHours>(
        "SELECT id, professional_id, weekday, start_time, end_time, closed
         FROM working_hours
         WHERE professional_id = ? AND weekday = ? AND active = 1",
    )
    .bind(professional_id)
    .bind(weekday as i64)
    .fetch_optional(db)
    .await
}

/// Opening and closing time of a working-hours row in seconds since midnight.
/// `None` when the row is malformed or closes before it opens.
fn opening_window(hours: &WorkingHours) -> Option<(u32, u32)> {
    let open = time::parse_seconds(&hours.start_time).ok()?;
    let close = time::parse_seconds(&hours.end_time).ok()?;
    (close > open).then_some((open, close))
}

/// The requested `[start, end)` must sit inside the professional's hours.
pub fn check_within_hours(hours: Option<&WorkingHours>, start: &str, end: &str) -> AppResult<()> {
    let hours = match hours {
        Some(h) if !h.closed => h,
        _ => return Err(AppError::ProfessionalNotWorking),
    };

    let Some((open, close)) = opening_window(hours) else {
        tracing::warn!(
            professional_id = hours.professional_id,
            weekday = hours.weekday,
            "misconfigured working hours {}–{}",
            hours.start_time,
            hours.end_time
        );
        return Err(AppError::OutsideWorkingHours);
    };

    let start = time::parse_seconds(start)?;
    let end = time::parse_seconds(end)?;
    if end <= start || start < open || end > close {
        return Err(AppError::OutsideWorkingHours);
    }
    Ok(())
}

/// Rejects dates before today and, for today, starts earlier than
/// `now + buffer` in the business timezone.
pub fn check_not_past(policy: &SlotPolicy, date: NaiveDate, start: &str) -> AppResult<()> {
    let today = policy.clock.today(policy.now);
    if date < today {
        return Err(AppError::PastTimeSlot);
    }
    if date > today {
        return Ok(());
    }

    let start = time::parse_seconds(start)?;
    let earliest = policy
        .clock
        .seconds_since_midnight(policy.now)
        .saturating_add(policy.buffer_min.saturating_mul(60));
    if start < earliest {
        return Err(AppError::PastTimeSlot);
    }
    Ok(())
}

/// Weekday hours, containment and past-time checks for a requested slot.
pub async fn check_availability(
    db: &SqlitePool,
    policy: &SlotPolicy,
    professional_id: i64,
    date: NaiveDate,
    start: &str,
    end: &str,
) -> AppResult<()> {
    let hours = load_working_hours(db, professional_id, time::weekday_index(date)).await?;
    check_within_hours(hours.as_ref(), start, end)?;
    check_not_past(policy, date, start)
}

/// Id of a live appointment overlapping the requested interval, if any.
pub async fn find_conflict(
    db: &SqlitePool,
    professional_id: i64,
    date: &str,
    start: &str,
    end: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let sql = format!("SELECT id FROM appointments WHERE {LIVE_OVERLAP_SQL} LIMIT 1");
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(professional_id)
        .bind(date)
        .bind(end)
        .bind(start)
        .fetch_optional(db)
        .await
}

/// Pre-insert conflict check. The conditional insert in `booking` stays authoritative.
pub async fn ensure_slot_free(
    db: &SqlitePool,
    professional_id: i64,
    date: &str,
    start: &str,
    end: &str,
) -> AppResult<()> {
    if let Some(existing) = find_conflict(db, professional_id, date, start, end).await? {
        tracing::info!(
            professional_id,
            existing,
            "slot {} {}–{} overlaps a live appointment",
            date,
            start,
            end
        );
        return Err(AppError::SlotUnavailable);
    }
    Ok(())
}

/// Start times within the professional's hours on `date` that fit a service
/// of `duration_min`, stepping by `step_min`, skipping live appointments and
/// times already passed.
pub async fn bookable_times(
    db: &SqlitePool,
    policy: &SlotPolicy,
    professional_id: i64,
    date: NaiveDate,
    duration_min: u32,
    step_min: u32,
) -> AppResult<Vec<TimeBlock>> {
    let hours = load_working_hours(db, professional_id, time::weekday_index(date)).await?;
    let Some((open, close)) = hours
        .as_ref()
        .filter(|h| !h.closed)
        .and_then(opening_window)
    else {
        return Ok(Vec::new());
    };

    let date_str = date.format("%Y-%m-%d").to_string();
    let booked: Vec<(String, String)> = sqlx::query_as(
        "SELECT start_time, end_time FROM appointments
         WHERE professional_id = ? AND date = ? AND status IN ('pending', 'confirmed')
         ORDER BY start_time ASC",
    )
    .bind(professional_id)
    .bind(&date_str)
    .fetch_all(db)
    .await?;

    let blocks = candidate_blocks(open, close, duration_min, step_min, &booked)
        .into_iter()
        .filter(|block| check_not_past(policy, date, &block.start_time).is_ok())
        .collect();
    Ok(blocks)
}

fn candidate_blocks(
    open: u32,
    close: u32,
    duration_min: u32,
    step_min: u32,
    booked: &[(String, String)],
) -> Vec<TimeBlock> {
    let duration = duration_min.saturating_mul(60);
    let step = step_min.max(1).saturating_mul(60);
    let mut blocks = Vec::new();
    if duration == 0 {
        return blocks;
    }

    let mut cursor = open;
    while let Some(end) = cursor.checked_add(duration).filter(|end| *end <= close) {
        let start_time = time::format_seconds(cursor);
        let end_time = time::format_seconds(end);
        let taken = booked
            .iter()
            .any(|(s, e)| overlaps(&start_time, &end_time, s, e));
        if !taken {
            blocks.push(TimeBlock {
                start_time,
                end_time,
            });
        }
        match cursor.checked_add(step) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    blocks
}
