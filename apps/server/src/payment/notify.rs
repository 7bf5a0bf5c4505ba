use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::catalog;
use crate::clock::format_hhmm;
use crate::error::{BookingError, BookingResult};
use crate::models::Appointment;

/// Best-effort announcement of newly confirmed appointments. Failures are
/// logged by the caller and never undo a booking.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn appointments_confirmed(&self, appointments: &[Appointment]) -> BookingResult<()>;
}

/// Plain-text summary of a confirmed booking or group.
pub fn summary(appointments: &[Appointment]) -> String {
    let Some(first) = appointments.first() else {
        return String::new();
    };
    let mut text = format!("Paid booking: {} ({})\n", first.client_name, first.client_phone);
    for appointment in appointments {
        text.push_str(&format!(
            "- {} {}",
            appointment.date,
            format_hhmm(appointment.time)
        ));
        if let Some(extra) = &appointment.extra_services {
            text.push_str(&format!(" + {extra}"));
        }
        text.push('\n');
    }
    if first.is_deposit && first.cash_amount_due > 0 {
        text.push_str(&format!(
            "Paid {} online, {} due in cash",
            first.paid_amount, first.cash_amount_due
        ));
    } else {
        text.push_str(&format!("Paid {} online", first.paid_amount));
    }
    text
}

// ── Telegram ──

/// Messages the barber's Telegram chat, or the operator chat when the
/// barber has none.
pub struct TelegramNotifier {
    db: SqlitePool,
    http: reqwest::Client,
    bot_token: String,
    fallback_chat_id: Option<i64>,
}

impl TelegramNotifier {
    pub fn new(db: SqlitePool, bot_token: String, fallback_chat_id: Option<i64>) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            bot_token,
            fallback_chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn appointments_confirmed(&self, appointments: &[Appointment]) -> BookingResult<()> {
        let Some(first) = appointments.first() else {
            return Ok(());
        };
        let barber = catalog::barber_by_id(&self.db, first.barber_id).await?;
        let Some(chat_id) = barber.telegram_chat_id.or(self.fallback_chat_id) else {
            tracing::debug!(barber_id = barber.id, "No Telegram chat for barber, skipping");
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        self.http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": summary(appointments),
            }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| BookingError::Integration(format!("telegram send failed: {e}")))?;
        Ok(())
    }
}

/// Log-only notifier, used when no messaging credentials are configured.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn appointments_confirmed(&self, appointments: &[Appointment]) -> BookingResult<()> {
        let ids: Vec<i64> = appointments.iter().map(|a| a.id).collect();
        tracing::info!(appointment_ids = ?ids, "{}", summary(appointments));
        Ok(())
    }
}
