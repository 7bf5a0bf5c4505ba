//! Booking metadata attached to a provider payment at checkout.
//!
//! Three encodings are still in circulation and all normalize to
//! [`BookingMetadata`]:
//!
//! - `sesiones`: list of `{fecha, hora, adicionalesIds}`
//! - `horarios` (legacy multi-session): list of `{fecha, hora, servicioId}`
//! - flat `fecha` / `hora` / `adicionalesIds` (legacy single session)
//!
//! The checkout writes Spanish camelCase keys (`sucursalId`, `barberoId`,
//! `tipoCorteId`, `senia`, `montoTotal`, ...). English names are accepted
//! as aliases. The provider rewrites keys to snake_case, so every alias is
//! looked up in both spellings. Lists may arrive as JSON arrays or as
//! JSON-encoded strings, and numbers as numbers or strings.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::clock::{parse_date, parse_time_of_day};
use crate::models::ClientInfo;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("payment carries no booking metadata")]
    Missing,
    #[error("metadata field {0} is missing")]
    MissingField(&'static str),
    #[error("metadata field {field} is invalid: {value}")]
    Invalid { field: &'static str, value: String },
    #[error("metadata has no usable session")]
    NoSessions,
}

/// Accepted spellings of one metadata field. The first one is the name the
/// checkout writes and the one reported in errors.
type Key = &'static [&'static str];

const BRANCH_ID: Key = &["sucursalId", "branchId"];
const BARBER_ID: Key = &["barberoId", "barberId"];
const SERVICE_ID: Key = &["tipoCorteId", "serviceId"];
const CLIENT_NAME: Key = &["clienteNombre", "clientName"];
const CLIENT_PHONE: Key = &["clienteTelefono", "clientPhone"];
const CLIENT_AGE: Key = &["clienteEdad", "clientAge"];
const DEPOSIT: Key = &["senia", "deposit"];
const TOTAL_AMOUNT: Key = &["montoTotal", "totalAmount"];
const UNIT_PRICE: Key = &["unitPriceUsado", "unitPrice"];
const SESSIONS: Key = &["sesiones", "sessions"];
const SLOTS: Key = &["horarios", "slots"];
const DATE: Key = &["fecha", "date"];
const TIME: Key = &["hora", "time"];
const EXTRA_SERVICE_IDS: Key = &["adicionalesIds", "extraServiceIds"];
const SLOT_SERVICE_ID: Key = &["servicioId", "serviceId"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataShape {
    Sessions,
    LegacySlots,
    LegacySingle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub extra_service_ids: Vec<i64>,
    /// Per-slot service from the legacy multi-session shape.
    pub service_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingMetadata {
    pub branch_id: i64,
    pub barber_id: i64,
    pub service_id: i64,
    pub client: ClientInfo,
    pub deposit: bool,
    pub total_amount: Option<i64>,
    pub unit_price: Option<i64>,
    pub shape: MetadataShape,
    pub sessions: Vec<Session>,
}

impl BookingMetadata {
    pub fn from_provider(metadata: Option<&Map<String, Value>>) -> Result<Self, MetadataError> {
        let meta = match metadata {
            Some(m) if !m.is_empty() => m,
            _ => return Err(MetadataError::Missing),
        };

        let (shape, sessions) = if let Some(list) = list_field(meta, SESSIONS)? {
            (MetadataShape::Sessions, parse_sessions(&list, false))
        } else if let Some(list) = list_field(meta, SLOTS)? {
            (MetadataShape::LegacySlots, parse_sessions(&list, true))
        } else {
            (MetadataShape::LegacySingle, single_session(meta)?.into_iter().collect())
        };
        if sessions.is_empty() {
            return Err(MetadataError::NoSessions);
        }

        Ok(Self {
            branch_id: require(integer(meta, BRANCH_ID)?, BRANCH_ID)?,
            barber_id: require(integer(meta, BARBER_ID)?, BARBER_ID)?,
            service_id: require(integer(meta, SERVICE_ID)?, SERVICE_ID)?,
            client: ClientInfo {
                name: require(text(meta, CLIENT_NAME), CLIENT_NAME)?,
                phone: text(meta, CLIENT_PHONE).unwrap_or_default(),
                age: text(meta, CLIENT_AGE),
            },
            deposit: boolean(meta, DEPOSIT)?.unwrap_or(false),
            total_amount: integer(meta, TOTAL_AMOUNT)?,
            unit_price: integer(meta, UNIT_PRICE)?,
            shape,
            sessions,
        })
    }

    pub fn is_multi_session(&self) -> bool {
        self.sessions.len() > 1
    }
}

// ── Field access ──

/// `clientName` -> `client_name`.
fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn lookup<'a>(meta: &'a Map<String, Value>, key: Key) -> Option<&'a Value> {
    key.iter()
        .find_map(|name| {
            meta.get(*name)
                .or_else(|| meta.get(&snake_case(name)))
                .filter(|v| !v.is_null())
        })
}

fn field_name(key: Key) -> &'static str {
    key.first().copied().unwrap_or_default()
}

fn require<T>(value: Option<T>, key: Key) -> Result<T, MetadataError> {
    value.ok_or(MetadataError::MissingField(field_name(key)))
}

fn text(meta: &Map<String, Value>, key: Key) -> Option<String> {
    let value = lookup(meta, key)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

fn integer(meta: &Map<String, Value>, key: Key) -> Result<Option<i64>, MetadataError> {
    match lookup(meta, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value_to_i64(value).map(Some).ok_or_else(|| MetadataError::Invalid {
            field: field_name(key),
            value: value.to_string(),
        }),
    }
}

fn boolean(meta: &Map<String, Value>, key: Key) -> Result<Option<bool>, MetadataError> {
    match lookup(meta, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" | "" => Ok(Some(false)),
            _ => Err(MetadataError::Invalid { field: field_name(key), value: s.clone() }),
        },
        Some(other) => Err(MetadataError::Invalid { field: field_name(key), value: other.to_string() }),
    }
}

/// A list given inline or as a JSON-encoded string. Blank strings and empty
/// lists count as absent so the next shape gets a chance.
fn list_field(meta: &Map<String, Value>, key: Key) -> Result<Option<Vec<Value>>, MetadataError> {
    let list = match lookup(meta, key) {
        None => return Ok(None),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => return Err(MetadataError::Invalid { field: field_name(key), value: s.clone() }),
        },
        Some(other) => {
            return Err(MetadataError::Invalid { field: field_name(key), value: other.to_string() })
        }
    };
    Ok((!list.is_empty()).then_some(list))
}

/// Additional-service ids as an array or a comma-separated string.
fn id_list(value: Option<&Value>) -> Vec<i64> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(value_to_i64).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect(),
        Some(Value::Number(_)) => value.and_then(value_to_i64).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_sessions(items: &[Value], with_service: bool) -> Vec<Session> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let Value::Object(entry) = item else {
                tracing::warn!(index, "Session entry is not an object, skipped");
                return None;
            };
            let session = session_from(entry, with_service);
            if session.is_none() {
                tracing::warn!(index, entry = %item, "Incomplete session skipped");
            }
            session
        })
        .collect()
}

fn session_from(entry: &Map<String, Value>, with_service: bool) -> Option<Session> {
    let date = parse_date(&text(entry, DATE)?)?;
    let time = parse_time_of_day(&text(entry, TIME)?)?;
    let service_id = if with_service {
        lookup(entry, SLOT_SERVICE_ID).and_then(value_to_i64)
    } else {
        None
    };
    Some(Session {
        date,
        time,
        extra_service_ids: id_list(lookup(entry, EXTRA_SERVICE_IDS)),
        service_id,
    })
}

fn single_session(meta: &Map<String, Value>) -> Result<Option<Session>, MetadataError> {
    let (Some(date), Some(time)) = (text(meta, DATE), text(meta, TIME)) else {
        return Ok(None);
    };
    let date = parse_date(&date).ok_or(MetadataError::Invalid { field: "fecha", value: date.clone() })?;
    let time = parse_time_of_day(&time).ok_or(MetadataError::Invalid { field: "hora", value: time.clone() })?;
    Ok(Some(Session {
        date,
        time,
        extra_service_ids: id_list(lookup(meta, EXTRA_SERVICE_IDS)),
        service_id: None,
    }))
}
