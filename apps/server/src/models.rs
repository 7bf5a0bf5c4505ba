use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

use crate::clock::{format_hhmm, parse_time_of_day, DATE_FORMAT};

// ── Appointment status ──

/// Persisted appointment status, stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    AwaitingPayment,
    Confirmed,
    Blocked,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::Blocked => "BLOCKED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_PAYMENT" => Ok(Self::AwaitingPayment),
            "CONFIRMED" => Ok(Self::Confirmed),
            "BLOCKED" => Ok(Self::Blocked),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown appointment status {other:?}")),
        }
    }
}

// ── Appointment kind ──

/// What an appointment *is*, derived from its status and payment flag.
///
/// Every component that asks "does this appointment hold its slot?" goes
/// through [`AppointmentKind::occupies_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    /// Online checkout started, payment not confirmed yet.
    AwaitingPayment,
    /// Paid through the payment provider.
    ConfirmedOnline,
    /// Created by staff for a walk-in or phone booking.
    StaffBlocked,
    Cancelled,
}

impl AppointmentKind {
    pub fn classify(status: AppointmentStatus, payment_confirmed: bool) -> Self {
        match status {
            AppointmentStatus::Cancelled => Self::Cancelled,
            AppointmentStatus::Blocked => Self::StaffBlocked,
            AppointmentStatus::Confirmed => Self::ConfirmedOnline,
            AppointmentStatus::AwaitingPayment if payment_confirmed => Self::ConfirmedOnline,
            AppointmentStatus::AwaitingPayment => Self::AwaitingPayment,
        }
    }

    pub fn occupies_slot(self) -> bool {
        match self {
            Self::ConfirmedOnline | Self::StaffBlocked => true,
            Self::AwaitingPayment | Self::Cancelled => false,
        }
    }
}

// ── Appointment ──

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub client_age: Option<String>,
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub extra_services: Option<String>,
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_hhmm")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub payment_confirmed: bool,
    pub paid_amount: i64,
    pub cash_amount_due: i64,
    pub is_deposit: bool,
    pub group_id: Option<String>,
    pub reminder_sent: bool,
    pub created_at: String,
}

impl Appointment {
    pub fn kind(&self) -> AppointmentKind {
        AppointmentKind::classify(self.status, self.payment_confirmed)
    }

    pub fn occupies_slot(&self) -> bool {
        self.kind().occupies_slot()
    }
}

impl<'r> FromRow<'r, SqliteRow> for Appointment {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let date: String = row.try_get("date")?;
        let time: String = row.try_get("time")?;
        let status: String = row.try_get("status")?;

        Ok(Self {
            id: row.try_get("id")?,
            client_name: row.try_get("client_name")?,
            client_phone: row.try_get("client_phone")?,
            client_age: row.try_get("client_age")?,
            branch_id: row.try_get("branch_id")?,
            barber_id: row.try_get("barber_id")?,
            service_id: row.try_get("service_id")?,
            extra_services: row.try_get("extra_services")?,
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .map_err(|e| decode_error("date", e))?,
            time: parse_time_of_day(&time)
                .ok_or_else(|| decode_error("time", format!("malformed time {time:?}")))?,
            status: status.parse().map_err(|e: String| decode_error("status", e))?,
            payment_confirmed: row.try_get("payment_confirmed")?,
            paid_amount: row.try_get("paid_amount")?,
            cash_amount_due: row.try_get("cash_amount_due")?,
            is_deposit: row.try_get("is_deposit")?,
            group_id: row.try_get("group_id")?,
            reminder_sent: row.try_get("reminder_sent")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_error(
    column: &str,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: err.into(),
    }
}

fn serialize_hhmm<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_hhmm(*time))
}

/// Contact fields captured with a booking. Not a client account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub age: Option<String>,
}

// ── Payment ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub appointment_id: i64,
    pub preference_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    /// RFC 3339, business timezone.
    pub created_at: String,
}

// ── Catalog ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Branch {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Barber {
    pub id: i64,
    pub branch_id: i64,
    pub name: String,
    pub telegram_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: i64,
}

// ── Schedule ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeeklySchedule {
    pub id: i64,
    pub barber_id: i64,
    /// ISO weekday, Monday = 1.
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExceptionalDay {
    pub id: i64,
    pub barber_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ManualBlock {
    pub id: i64,
    pub barber_id: i64,
    pub date: String,
    pub time: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct FreeSlotsQuery {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_age: Option<String>,
    pub checkout: Option<CheckoutRequest>,
}

/// Provider checkout that the web client opened for a held appointment.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub preference_id: String,
    pub amount: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub appointment: Appointment,
    pub payment: Option<Payment>,
}

#[derive(Debug, Deserialize)]
pub struct StaffBookingRequest {
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub date: String,
    pub time: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_age: Option<String>,
    #[serde(default)]
    pub extra_service_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WeeklyWindowRequest {
    pub day_of_week: u32,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct ExceptionalWindowRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualBlockRequest {
    pub date: String,
    pub time: String,
}

/// Webhook query string. The provider sends either `type` + `data.id`
/// or the older `topic` + `id` pair.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub topic: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    pub id: Option<String>,
}

impl WebhookQuery {
    pub fn event_kind(&self) -> Option<&str> {
        self.kind.as_deref().or(self.topic.as_deref())
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.data_id.as_deref().or(self.id.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
