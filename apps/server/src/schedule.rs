//! Weekly schedules, exceptional days and legacy manual blocks.

use chrono::{NaiveDate, NaiveTime};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::catalog;
use crate::clock::{format_hhmm, parse_time_of_day, DATE_FORMAT};
use crate::error::{BookingError, BookingResult};
use crate::models::{ExceptionalDay, ManualBlock, WeeklySchedule};

// ── Reads ──

pub async fn weekly_entries(
    db: &SqlitePool,
    barber_id: i64,
    day_of_week: u32,
) -> BookingResult<Vec<WeeklySchedule>> {
    let rows = sqlx::query_as::<_, WeeklySchedule>(
        "SELECT * FROM weekly_schedules WHERE barber_id = ? AND day_of_week = ? ORDER BY start_time",
    )
    .bind(barber_id)
    .bind(day_of_week)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn exceptional_entries(
    db: &SqlitePool,
    barber_id: i64,
    date: NaiveDate,
) -> BookingResult<Vec<ExceptionalDay>> {
    let rows = sqlx::query_as::<_, ExceptionalDay>(
        "SELECT * FROM exceptional_days WHERE barber_id = ? AND date = ? ORDER BY start_time",
    )
    .bind(barber_id)
    .bind(date.format(DATE_FORMAT).to_string())
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn manual_blocks<'e, E>(
    db: E,
    barber_id: i64,
    date: NaiveDate,
) -> BookingResult<Vec<ManualBlock>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, ManualBlock>(
        "SELECT * FROM manual_blocks WHERE barber_id = ? AND date = ?",
    )
    .bind(barber_id)
    .bind(date.format(DATE_FORMAT).to_string())
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Parsed block times for a day. Malformed rows are logged and skipped.
pub fn blocked_times(blocks: &[ManualBlock]) -> Vec<NaiveTime> {
    blocks
        .iter()
        .filter_map(|block| {
            let parsed = parse_time_of_day(&block.time);
            if parsed.is_none() {
                tracing::warn!(block_id = block.id, time = %block.time, "Malformed manual block time");
            }
            parsed
        })
        .collect()
}

// ── Staff writes ──

pub async fn add_weekly_window(
    db: &SqlitePool,
    barber_id: i64,
    day_of_week: u32,
    start: &str,
    end: &str,
) -> BookingResult<WeeklySchedule> {
    if !(1..=7).contains(&day_of_week) {
        return Err(BookingError::Validation(format!(
            "day_of_week must be 1..7, got {day_of_week}"
        )));
    }
    let (start, end) = validate_window(start, end)?;
    catalog::barber_by_id(db, barber_id).await?;

    let id = sqlx::query(
        "INSERT INTO weekly_schedules (barber_id, day_of_week, start_time, end_time) VALUES (?, ?, ?, ?)",
    )
    .bind(barber_id)
    .bind(day_of_week)
    .bind(format_hhmm(start))
    .bind(format_hhmm(end))
    .execute(db)
    .await?
    .last_insert_rowid();

    tracing::info!(barber_id, day_of_week, "Weekly window added");

    Ok(sqlx::query_as::<_, WeeklySchedule>("SELECT * FROM weekly_schedules WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?)
}

pub async fn add_exceptional_window(
    db: &SqlitePool,
    barber_id: i64,
    date: NaiveDate,
    start: &str,
    end: &str,
) -> BookingResult<ExceptionalDay> {
    let (start, end) = validate_window(start, end)?;
    catalog::barber_by_id(db, barber_id).await?;

    let id = sqlx::query(
        "INSERT INTO exceptional_days (barber_id, date, start_time, end_time) VALUES (?, ?, ?, ?)",
    )
    .bind(barber_id)
    .bind(date.format(DATE_FORMAT).to_string())
    .bind(format_hhmm(start))
    .bind(format_hhmm(end))
    .execute(db)
    .await?
    .last_insert_rowid();

    tracing::info!(barber_id, %date, "Exceptional window added");

    Ok(sqlx::query_as::<_, ExceptionalDay>("SELECT * FROM exceptional_days WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?)
}

pub async fn add_manual_block(
    db: &SqlitePool,
    barber_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> BookingResult<ManualBlock> {
    catalog::barber_by_id(db, barber_id).await?;

    let id = sqlx::query("INSERT INTO manual_blocks (barber_id, date, time) VALUES (?, ?, ?)")
        .bind(barber_id)
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(format_hhmm(time))
        .execute(db)
        .await?
        .last_insert_rowid();

    tracing::info!(barber_id, %date, time = %format_hhmm(time), "Manual block added");

    Ok(sqlx::query_as::<_, ManualBlock>("SELECT * FROM manual_blocks WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await?)
}

fn validate_window(start: &str, end: &str) -> BookingResult<(NaiveTime, NaiveTime)> {
    let parse = |raw: &str| {
        parse_time_of_day(raw)
            .ok_or_else(|| BookingError::Validation(format!("invalid time {raw:?}")))
    };
    let (start, end) = (parse(start)?, parse(end)?);
    if end < start {
        return Err(BookingError::Validation(format!(
            "window ends before it starts: {} - {}",
            format_hhmm(start),
            format_hhmm(end)
        )));
    }
    Ok((start, end))
}
