//! Free-slot computation.
//!
//! A barber's working windows for a date come from exceptional-day entries
//! when any exist for that date, otherwise from the weekly schedule for the
//! weekday. Windows are cut into 30 minute slots (the window end is itself a
//! bookable start), then occupied appointments and manual blocks are removed.
//! Nothing is cached: every call reads the store fresh.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::clock::{minute_floor, parse_time_of_day, Clock, DATE_FORMAT};
use crate::error::BookingResult;
use crate::models::{AppointmentKind, AppointmentStatus};
use crate::schedule;

pub const SLOT_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }

    /// Slot start times from `start` through `end` inclusive. Stops early
    /// instead of wrapping past midnight.
    pub fn slots(&self) -> Vec<NaiveTime> {
        let step = Duration::minutes(SLOT_MINUTES);
        let mut slots = Vec::new();
        let mut slot = self.start;
        while slot <= self.end {
            slots.push(slot);
            let (next, wrapped_secs) = slot.overflowing_add_signed(step);
            if wrapped_secs != 0 || next <= slot {
                break;
            }
            slot = next;
        }
        slots
    }
}

/// Turns stored (start, end) strings into windows, logging and skipping
/// malformed or inverted ones.
fn parse_windows<'a>(
    barber_id: i64,
    raw: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<WorkingWindow> {
    raw.into_iter()
        .filter_map(|(start, end)| {
            let (Some(s), Some(e)) = (parse_time_of_day(start), parse_time_of_day(end)) else {
                tracing::warn!(barber_id, start, end, "Malformed working window skipped");
                return None;
            };
            if e < s {
                tracing::warn!(barber_id, start, end, "Working window ends before it starts, skipped");
                return None;
            }
            Some(WorkingWindow { start: s, end: e })
        })
        .collect()
}

/// The windows a barber works on `date`. Exceptional entries for the date
/// replace the weekly schedule entirely, even when they parse to nothing.
pub async fn working_windows(
    db: &SqlitePool,
    barber_id: i64,
    date: NaiveDate,
) -> BookingResult<Vec<WorkingWindow>> {
    let exceptional = schedule::exceptional_entries(db, barber_id, date).await?;
    if !exceptional.is_empty() {
        return Ok(parse_windows(
            barber_id,
            exceptional
                .iter()
                .map(|e| (e.start_time.as_str(), e.end_time.as_str())),
        ));
    }

    let weekday = date.weekday().number_from_monday();
    let weekly = schedule::weekly_entries(db, barber_id, weekday).await?;
    Ok(parse_windows(
        barber_id,
        weekly.iter().map(|w| (w.start_time.as_str(), w.end_time.as_str())),
    ))
}

/// Pure slot arithmetic: candidates from all windows, minus occupied and
/// blocked times, sorted and deduplicated, optionally dropping anything
/// before `not_before`.
pub fn compute_free_slots(
    windows: &[WorkingWindow],
    occupied: &BTreeSet<NaiveTime>,
    blocked: &BTreeSet<NaiveTime>,
    not_before: Option<NaiveTime>,
) -> Vec<NaiveTime> {
    windows
        .iter()
        .flat_map(WorkingWindow::slots)
        .filter(|slot| !occupied.contains(slot) && !blocked.contains(slot))
        .filter(|slot| not_before.map_or(true, |floor| *slot >= floor))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(sqlx::FromRow)]
struct OccupancyRow {
    id: i64,
    time: String,
    status: String,
    payment_confirmed: bool,
}

/// Times held by appointments that occupy their slot. Rows that cannot be
/// understood are logged and ignored.
async fn occupied_times(
    db: &SqlitePool,
    barber_id: i64,
    date: NaiveDate,
) -> BookingResult<BTreeSet<NaiveTime>> {
    let rows = sqlx::query_as::<_, OccupancyRow>(
        "SELECT id, time, status, payment_confirmed FROM appointments
         WHERE barber_id = ? AND date = ?",
    )
    .bind(barber_id)
    .bind(date.format(DATE_FORMAT).to_string())
    .fetch_all(db)
    .await?;

    let mut occupied = BTreeSet::new();
    for row in rows {
        let Ok(status) = row.status.parse::<AppointmentStatus>() else {
            tracing::warn!(appointment_id = row.id, status = %row.status, "Unknown appointment status");
            continue;
        };
        if !AppointmentKind::classify(status, row.payment_confirmed).occupies_slot() {
            continue;
        }
        match parse_time_of_day(&row.time) {
            Some(time) => {
                occupied.insert(time);
            }
            None => {
                tracing::warn!(appointment_id = row.id, time = %row.time, "Malformed appointment time");
            }
        }
    }
    Ok(occupied)
}

pub struct AvailabilityEngine {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AvailabilityEngine {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Bookable slot start times for `barber_id` on `date`, ascending.
    pub async fn free_slots(&self, barber_id: i64, date: NaiveDate) -> BookingResult<Vec<NaiveTime>> {
        let windows = working_windows(&self.db, barber_id, date).await?;
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let occupied = occupied_times(&self.db, barber_id, date).await?;
        let blocks = schedule::manual_blocks(&self.db, barber_id, date).await?;
        let blocked: BTreeSet<NaiveTime> = schedule::blocked_times(&blocks).into_iter().collect();

        let now = self.clock.now();
        let not_before = (date == now.date_naive()).then(|| minute_floor(&now));

        Ok(compute_free_slots(&windows, &occupied, &blocked, not_before))
    }
}
