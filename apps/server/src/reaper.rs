//! Cancels online holds whose checkout was abandoned.
//!
//! The linked payment row decides: no row, or a row still pending after the
//! timeout, means the client walked away. A row in any other state means
//! the confirmation webhook went missing, which an operator has to look at.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::appointments;
use crate::clock::{format_hhmm, Clock};
use crate::error::{BookingError, BookingResult};
use crate::models::{Appointment, Payment};

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    pub pending_timeout: chrono::Duration,
    /// More cancellations than this in one pass raises an alert.
    pub alert_threshold: usize,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            pending_timeout: chrono::Duration::minutes(15),
            alert_threshold: 10,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub cancelled: usize,
    pub kept: usize,
    pub manual_review: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReaperStats {
    pub pending: usize,
    pub zombies: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    MissingPayment,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Cancel(CancelReason),
    Keep,
    ManualReview,
}

fn is_pending(status: &str) -> bool {
    matches!(
        status.trim().to_ascii_lowercase().as_str(),
        "pending" | "in_process" | "in process"
    )
}

fn judge(
    payment: Option<&Payment>,
    now: DateTime<FixedOffset>,
    timeout: chrono::Duration,
) -> BookingResult<Verdict> {
    let Some(payment) = payment else {
        return Ok(Verdict::Cancel(CancelReason::MissingPayment));
    };
    let created = DateTime::parse_from_rfc3339(&payment.created_at).map_err(|e| {
        BookingError::DataInconsistency(format!(
            "payment {} has unreadable created_at {:?}: {e}",
            payment.id, payment.created_at
        ))
    })?;

    if created >= now - timeout {
        return Ok(Verdict::Keep);
    }
    if is_pending(&payment.status) {
        Ok(Verdict::Cancel(CancelReason::Abandoned))
    } else {
        Ok(Verdict::ManualReview)
    }
}

enum Reaped {
    Cancelled,
    Kept,
    ManualReview,
}

pub struct Reaper {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    settings: ReaperSettings,
}

/// More cancellations in one pass than the threshold points at a broken
/// webhook rather than abandoned carts.
fn is_spike(report: &ReapReport, threshold: usize) -> bool {
    report.cancelled > threshold
}

impl Reaper {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, settings: ReaperSettings) -> Self {
        Self { db, clock, settings }
    }

    /// One pass over today's and future holds. Never fails: problems with
    /// individual rows are logged and counted.
    pub async fn run_once(&self) -> ReapReport {
        let now = self.clock.now();
        let mut report = ReapReport::default();

        let candidates = match appointments::awaiting_payment_from(&self.db, now.date_naive()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Reaper could not load pending appointments: {}", e);
                report.errored += 1;
                return report;
            }
        };

        for appointment in &candidates {
            match self.reap(appointment, now).await {
                Ok(Reaped::Cancelled) => report.cancelled += 1,
                Ok(Reaped::Kept) => report.kept += 1,
                Ok(Reaped::ManualReview) => report.manual_review += 1,
                Err(e) => {
                    tracing::error!(appointment_id = appointment.id, "Reaper failed on appointment: {}", e);
                    report.errored += 1;
                }
            }
        }

        tracing::info!(
            cancelled = report.cancelled,
            kept = report.kept,
            manual_review = report.manual_review,
            errored = report.errored,
            "Reaper pass finished over {} pending appointment(s)",
            candidates.len()
        );
        if is_spike(&report, self.settings.alert_threshold) {
            tracing::error!(
                cancelled = report.cancelled,
                threshold = self.settings.alert_threshold,
                "High zombie booking count, check the payment webhook integration"
            );
        }
        report
    }

    /// Operator-triggered pass.
    pub async fn run_now(&self) -> ReapReport {
        tracing::info!("Reaper run requested manually");
        self.run_once().await
    }

    async fn reap(&self, appointment: &Appointment, now: DateTime<FixedOffset>) -> BookingResult<Reaped> {
        let payment = appointments::payment_for(&self.db, appointment.id).await?;

        match judge(payment.as_ref(), now, self.settings.pending_timeout)? {
            Verdict::Keep => Ok(Reaped::Kept),
            Verdict::ManualReview => {
                tracing::warn!(
                    appointment_id = appointment.id,
                    payment_status = payment.as_ref().map(|p| p.status.as_str()).unwrap_or("-"),
                    "Appointment {} {} still awaits payment but the payment moved on; needs manual review",
                    appointment.date,
                    format_hhmm(appointment.time)
                );
                Ok(Reaped::ManualReview)
            }
            Verdict::Cancel(reason) => {
                if reason == CancelReason::MissingPayment {
                    let inconsistency = BookingError::DataInconsistency(format!(
                        "appointment {} awaits payment without a payment record",
                        appointment.id
                    ));
                    tracing::warn!(appointment_id = appointment.id, "{}", inconsistency);
                }
                if appointments::cancel_if_awaiting(&self.db, appointment.id).await? {
                    tracing::info!(appointment_id = appointment.id, reason = ?reason, "Zombie booking cancelled");
                    Ok(Reaped::Cancelled)
                } else {
                    // Confirmed or cancelled elsewhere since it was loaded.
                    Ok(Reaped::Kept)
                }
            }
        }
    }

    /// Counts pending holds and how many of them the next pass would cancel.
    pub async fn stats(&self) -> BookingResult<ReaperStats> {
        let now = self.clock.now();
        let candidates = appointments::awaiting_payment_from(&self.db, now.date_naive()).await?;

        let mut zombies = 0;
        for appointment in &candidates {
            let payment = appointments::payment_for(&self.db, appointment.id).await?;
            if let Ok(Verdict::Cancel(_)) = judge(payment.as_ref(), now, self.settings.pending_timeout) {
                zombies += 1;
            }
        }

        Ok(ReaperStats {
            pending: candidates.len(),
            zombies,
        })
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::testing::*;
    use crate::models::AppointmentStatus;

    const NOW: &str = "2030-06-03T12:00:00-03:00";

    fn reaper(pool: &SqlitePool) -> Reaper {
        Reaper::new(pool.clone(), Arc::new(FixedClock::at(NOW)), ReaperSettings::default())
    }

    async fn status_of(pool: &SqlitePool, id: i64) -> AppointmentStatus {
        appointments::by_id(pool, id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_recent_pending_payment_is_kept() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-03", "15:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, id, "pending", "2030-06-03T11:58:00-03:00").await;

        let report = reaper(&pool).run_once().await;
        assert_eq!(report, ReapReport { kept: 1, ..Default::default() });
        assert_eq!(status_of(&pool, id).await, AppointmentStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_exactly_at_timeout_is_not_yet_stale() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-03", "15:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, id, "pending", "2030-06-03T11:45:00-03:00").await;

        assert_eq!(reaper(&pool).run_once().await.kept, 1);
    }

    #[tokio::test]
    async fn test_abandoned_checkout_is_cancelled_once() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-04", "10:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, id, "in_process", "2030-06-03T11:00:00-03:00").await;
        let reaper = reaper(&pool);

        let first = reaper.run_once().await;
        assert_eq!(first.cancelled, 1);
        assert_eq!(status_of(&pool, id).await, AppointmentStatus::Cancelled);

        let second = reaper.run_once().await;
        assert_eq!(second, ReapReport::default());

        // The payment row is left alone.
        let payment = appointments::payment_for(&pool, id).await.unwrap().unwrap();
        assert_eq!(payment.status, "in_process");
    }

    #[tokio::test]
    async fn test_missing_payment_record_is_cancelled() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-03", "18:00", "AWAITING_PAYMENT", false).await;

        assert_eq!(reaper(&pool).run_once().await.cancelled, 1);
        assert_eq!(status_of(&pool, id).await, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_moved_on_payment_goes_to_manual_review() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-03", "18:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, id, "approved", "2030-06-03T10:00:00-03:00").await;

        let report = reaper(&pool).run_once().await;
        assert_eq!(report.manual_review, 1);
        assert_eq!(status_of(&pool, id).await, AppointmentStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_past_days_and_other_statuses_are_out_of_scope() {
        let pool = memory_pool().await;
        let past = add_appointment(&pool, "2030-06-02", "18:00", "AWAITING_PAYMENT", false).await;
        add_appointment(&pool, "2030-06-05", "18:00", "CONFIRMED", true).await;

        assert_eq!(reaper(&pool).run_once().await, ReapReport::default());
        assert_eq!(status_of(&pool, past).await, AppointmentStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_unreadable_payment_timestamp_is_counted_as_error() {
        let pool = memory_pool().await;
        let id = add_appointment(&pool, "2030-06-03", "18:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, id, "pending", "yesterday").await;

        let report = reaper(&pool).run_once().await;
        assert_eq!(report.errored, 1);
        assert_eq!(status_of(&pool, id).await, AppointmentStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_stats_match_the_next_pass() {
        let pool = memory_pool().await;
        let young = add_appointment(&pool, "2030-06-03", "15:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, young, "pending", "2030-06-03T11:59:00-03:00").await;
        let old = add_appointment(&pool, "2030-06-03", "16:00", "AWAITING_PAYMENT", false).await;
        add_payment(&pool, old, "pending", "2030-06-03T09:00:00-03:00").await;
        add_appointment(&pool, "2030-06-03", "17:00", "AWAITING_PAYMENT", false).await;

        let reaper = reaper(&pool);
        assert_eq!(reaper.stats().await.unwrap(), ReaperStats { pending: 3, zombies: 2 });
        assert_eq!(reaper.run_now().await.cancelled, 2);
        assert_eq!(reaper.stats().await.unwrap(), ReaperStats { pending: 1, zombies: 0 });
    }

    #[test]
    fn test_pending_statuses() {
        assert!(is_pending("pending"));
        assert!(is_pending("IN_PROCESS"));
        assert!(!is_pending("approved"));
        assert!(!is_pending("rejected"));
    }

    async fn add_zombies(pool: &SqlitePool, count: usize) {
        for i in 0..count {
            let time = format!("{:02}:00", 8 + i);
            let id = add_appointment(pool, "2030-06-04", &time, "AWAITING_PAYMENT", false).await;
            add_payment(pool, id, "pending", "2030-06-03T09:00:00-03:00").await;
        }
    }

    #[tokio::test]
    async fn test_spike_alert_above_threshold() {
        let pool = memory_pool().await;
        add_zombies(&pool, 11).await;

        let report = reaper(&pool).run_once().await;
        assert_eq!(report.cancelled, 11);
        assert!(is_spike(&report, ReaperSettings::default().alert_threshold));
    }

    #[tokio::test]
    async fn test_no_spike_alert_at_threshold() {
        let pool = memory_pool().await;
        add_zombies(&pool, 10).await;

        let report = reaper(&pool).run_once().await;
        assert_eq!(report.cancelled, 10);
        assert!(!is_spike(&report, ReaperSettings::default().alert_threshold));
    }
}
