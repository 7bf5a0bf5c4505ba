//! Appointment and payment row access.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use sqlx::{Executor, Sqlite, SqliteConnection};

use crate::clock::{format_hhmm, DATE_FORMAT};
use crate::error::{BookingError, BookingResult};
use crate::models::{Appointment, AppointmentStatus, ClientInfo, Payment};

/// Everything needed to insert an appointment row.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub client: ClientInfo,
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub extra_services: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub payment_confirmed: bool,
    pub paid_amount: i64,
    pub cash_amount_due: i64,
    pub is_deposit: bool,
    pub group_id: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

pub async fn by_id<'e, E>(db: E, id: i64) -> BookingResult<Appointment>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| BookingError::not_found("appointment", id))
}

/// All appointments, in any status, at one (barber, date, time).
pub async fn at_slot<'e, E>(
    db: E,
    barber_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> BookingResult<Vec<Appointment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let day = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments WHERE barber_id = ? AND date = ? ORDER BY id",
    )
    .bind(barber_id)
    .bind(date.format(DATE_FORMAT).to_string())
    .fetch_all(db)
    .await?;

    Ok(day.into_iter().filter(|a| a.time == time).collect())
}

pub async fn insert(conn: &mut SqliteConnection, new: &NewAppointment) -> BookingResult<Appointment> {
    let id = sqlx::query(
        "INSERT INTO appointments
            (client_name, client_phone, client_age, branch_id, barber_id, service_id,
             extra_services, date, time, status, payment_confirmed, paid_amount,
             cash_amount_due, is_deposit, group_id, reminder_sent, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&new.client.name)
    .bind(&new.client.phone)
    .bind(&new.client.age)
    .bind(new.branch_id)
    .bind(new.barber_id)
    .bind(new.service_id)
    .bind(&new.extra_services)
    .bind(new.date.format(DATE_FORMAT).to_string())
    .bind(format_hhmm(new.time))
    .bind(new.status.as_str())
    .bind(new.payment_confirmed)
    .bind(new.paid_amount)
    .bind(new.cash_amount_due)
    .bind(new.is_deposit)
    .bind(&new.group_id)
    .bind(new.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    by_id(&mut *conn, id).await
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: AppointmentStatus,
) -> BookingResult<()> {
    sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Cancels only if the row is still awaiting payment. Returns whether it
/// changed.
pub async fn cancel_if_awaiting<'e, E>(db: E, id: i64) -> BookingResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE appointments SET status = 'CANCELLED' WHERE id = ? AND status = 'AWAITING_PAYMENT'",
    )
    .bind(id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn awaiting_payment_from<'e, E>(db: E, from: NaiveDate) -> BookingResult<Vec<Appointment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments WHERE status = 'AWAITING_PAYMENT' AND date >= ? ORDER BY date, time",
    )
    .bind(from.format(DATE_FORMAT).to_string())
    .fetch_all(db)
    .await?;
    Ok(rows)
}

// ── Payments ──

pub async fn payment_for<'e, E>(db: E, appointment_id: i64) -> BookingResult<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE appointment_id = ?")
        .bind(appointment_id)
        .fetch_optional(db)
        .await?;
    Ok(payment)
}

pub async fn insert_pending_payment(
    conn: &mut SqliteConnection,
    appointment_id: i64,
    preference_id: &str,
    amount: i64,
    currency: &str,
    created_at: DateTime<FixedOffset>,
) -> BookingResult<Payment> {
    sqlx::query(
        "INSERT INTO payments (appointment_id, preference_id, status, amount, currency, created_at)
         VALUES (?, ?, 'pending', ?, ?, ?)",
    )
    .bind(appointment_id)
    .bind(preference_id)
    .bind(amount)
    .bind(currency)
    .bind(created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    payment_for(&mut *conn, appointment_id)
        .await?
        .ok_or_else(|| BookingError::DataInconsistency(format!(
            "payment for appointment {appointment_id} vanished after insert"
        )))
}
