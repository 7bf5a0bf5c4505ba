//! Synchronous bookings: web checkout holds and staff walk-ins.

use chrono::{NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::appointments::{self, NewAppointment};
use crate::availability::working_windows;
use crate::catalog;
use crate::clock::{format_hhmm, Clock};
use crate::error::{BookingError, BookingResult};
use crate::models::{Appointment, AppointmentStatus, CheckoutRequest, ClientInfo, Payment};
use crate::schedule;
use crate::slot_lock::SlotLock;

/// One requested slot with the client it is for.
#[derive(Debug, Clone)]
pub struct SlotRequest {
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub client: ClientInfo,
}

pub struct ReservationService {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ReservationService {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Holds a slot for online checkout. The appointment starts out
    /// `AWAITING_PAYMENT` and does not occupy the slot until paid.
    pub async fn reserve(&self, request: &SlotRequest) -> BookingResult<Appointment> {
        self.place(request, AppointmentStatus::AwaitingPayment, &[]).await
    }

    /// Staff booking for a walk-in or phone client. Occupies the slot at once.
    pub async fn block_slot(
        &self,
        request: &SlotRequest,
        extra_service_ids: &[i64],
    ) -> BookingResult<Appointment> {
        self.place(request, AppointmentStatus::Blocked, extra_service_ids).await
    }

    async fn place(
        &self,
        request: &SlotRequest,
        status: AppointmentStatus,
        extra_service_ids: &[i64],
    ) -> BookingResult<Appointment> {
        validate_client(&request.client)?;

        catalog::branch_by_id(&self.db, request.branch_id).await?;
        catalog::barber_by_id(&self.db, request.barber_id).await?;
        catalog::service_by_id(&self.db, request.service_id).await?;
        self.validate_working_hours(request.barber_id, request.date, request.time)
            .await?;

        let extras = catalog::services_by_ids(&self.db, extra_service_ids).await?;

        let new = NewAppointment {
            client: request.client.clone(),
            branch_id: request.branch_id,
            barber_id: request.barber_id,
            service_id: request.service_id,
            extra_services: catalog::join_names(&extras),
            date: request.date,
            time: request.time,
            status,
            payment_confirmed: false,
            paid_amount: 0,
            cash_amount_due: 0,
            is_deposit: false,
            group_id: None,
            created_at: self.clock.now(),
        };

        let mut lock = SlotLock::acquire(&self.db).await?;
        let created = match claim_slot(&mut lock, &new).await {
            Ok(created) => created,
            Err(e) => {
                lock.rollback().await;
                return Err(e);
            }
        };
        lock.commit().await?;

        tracing::info!(
            appointment_id = created.id,
            barber_id = created.barber_id,
            status = %created.status,
            "Appointment created for {} {}",
            created.date,
            format_hhmm(created.time)
        );
        Ok(created)
    }

    async fn validate_working_hours(
        &self,
        barber_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> BookingResult<()> {
        let windows = working_windows(&self.db, barber_id, date).await?;
        if windows.is_empty() {
            return Err(BookingError::Validation(format!(
                "barber {barber_id} does not work on {date}"
            )));
        }
        if !windows.iter().any(|w| w.contains(time)) {
            return Err(BookingError::Validation(format!(
                "{} is outside the barber's working hours on {date}",
                format_hhmm(time)
            )));
        }
        Ok(())
    }

    /// Staff cancellation. Cancelling twice returns the cancelled row.
    pub async fn cancel(&self, appointment_id: i64) -> BookingResult<Appointment> {
        let mut lock = SlotLock::acquire(&self.db).await?;
        let result: BookingResult<Appointment> = async {
            let appointment = appointments::by_id(lock.conn(), appointment_id).await?;
            if appointment.status == AppointmentStatus::Cancelled {
                return Ok(appointment);
            }
            appointments::set_status(lock.conn(), appointment_id, AppointmentStatus::Cancelled)
                .await?;
            appointments::by_id(lock.conn(), appointment_id).await
        }
        .await;

        match result {
            Ok(appointment) => {
                lock.commit().await?;
                tracing::info!(appointment_id, "Appointment cancelled");
                Ok(appointment)
            }
            Err(e) => {
                lock.rollback().await;
                Err(e)
            }
        }
    }

    /// Links the provider checkout to a held appointment as a `pending`
    /// payment. The reaper uses its age and status later.
    pub async fn record_checkout(
        &self,
        appointment_id: i64,
        checkout: &CheckoutRequest,
    ) -> BookingResult<Payment> {
        if checkout.preference_id.trim().is_empty() {
            return Err(BookingError::Validation("preference_id is required".into()));
        }
        if checkout.amount <= 0 {
            return Err(BookingError::Validation("checkout amount must be positive".into()));
        }
        let currency = checkout.currency.as_deref().unwrap_or("ARS");
        let now = self.clock.now();

        let mut lock = SlotLock::acquire(&self.db).await?;
        let result: BookingResult<Payment> = async {
            let appointment = appointments::by_id(lock.conn(), appointment_id).await?;
            if appointment.status != AppointmentStatus::AwaitingPayment {
                return Err(BookingError::Validation(format!(
                    "appointment {appointment_id} is {}, not awaiting payment",
                    appointment.status
                )));
            }
            if appointments::payment_for(lock.conn(), appointment_id).await?.is_some() {
                return Err(BookingError::Conflict(format!(
                    "appointment {appointment_id} already has a checkout"
                )));
            }
            appointments::insert_pending_payment(
                lock.conn(),
                appointment_id,
                &checkout.preference_id,
                checkout.amount,
                currency,
                now,
            )
            .await
        }
        .await;

        match result {
            Ok(payment) => {
                lock.commit().await?;
                tracing::info!(appointment_id, preference_id = %checkout.preference_id, "Checkout recorded");
                Ok(payment)
            }
            Err(e) => {
                lock.rollback().await;
                Err(e)
            }
        }
    }
}

/// Re-reads the slot under the lock and inserts if nothing holds it.
async fn claim_slot(lock: &mut SlotLock, new: &NewAppointment) -> BookingResult<Appointment> {
    let existing = appointments::at_slot(lock.conn(), new.barber_id, new.date, new.time).await?;
    if existing.iter().any(Appointment::occupies_slot) {
        return Err(BookingError::Conflict("slot already reserved".into()));
    }

    let blocks = schedule::manual_blocks(lock.conn(), new.barber_id, new.date).await?;
    if schedule::blocked_times(&blocks).contains(&new.time) {
        return Err(BookingError::Conflict("slot is blocked".into()));
    }

    appointments::insert(lock.conn(), new).await
}

fn validate_client(client: &ClientInfo) -> BookingResult<()> {
    if client.name.trim().is_empty() {
        return Err(BookingError::Validation("client name is required".into()));
    }
    if client.phone.trim().is_empty() {
        return Err(BookingError::Validation("client phone is required".into()));
    }
    Ok(())
}
